//! Dataset splits (Arrow/Parquet)
//!
//! The featurized dataset lives in three Parquet files under one directory:
//!
//! ```text
//! <input_dir>/train.parquet
//! <input_dir>/validation.parquet
//! <input_dir>/test.parquet
//! ```
//!
//! Every file holds numeric feature columns plus one target column. The
//! splits are read whole into row-major `f64` matrices; they are small
//! enough that out-of-core execution buys nothing.

use std::path::Path;

use arrow::array::{Array, ArrayRef, Float32Array, Float64Array, Int32Array, Int64Array};
use arrow::datatypes::{DataType, SchemaRef};
use arrow::record_batch::RecordBatch;
use tracing::debug;

use crate::{Error, Result};

/// File names of the three splits, in load order.
pub const SPLIT_FILES: [&str; 3] = ["train.parquet", "validation.parquet", "test.parquet"];

/// Record batches read from one Parquet file.
pub struct StorageEngine {
    batches: Vec<RecordBatch>,
}

impl StorageEngine {
    /// Create a new storage engine from existing batches
    #[must_use]
    pub fn new(batches: Vec<RecordBatch>) -> Self {
        Self { batches }
    }

    /// Load table from Parquet file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load_parquet<P: AsRef<Path>>(path: P) -> Result<Self> {
        use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
        use std::fs::File;

        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            Error::StorageError(format!("Failed to open Parquet file {}: {e}", path.display()))
        })?;

        let builder = ParquetRecordBatchReaderBuilder::try_new(file).map_err(|e| {
            Error::StorageError(format!("Failed to parse Parquet file {}: {e}", path.display()))
        })?;

        let reader = builder.build().map_err(|e| {
            Error::StorageError(format!("Failed to create Parquet reader: {e}"))
        })?;

        let mut storage = Self::new(Vec::new());
        for batch in reader {
            let batch = batch.map_err(|e| {
                Error::StorageError(format!("Failed to read record batch: {e}"))
            })?;
            storage.append_batch(batch)?;
        }

        Ok(storage)
    }

    /// Get all record batches
    #[must_use]
    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }

    /// Total number of rows.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(RecordBatch::num_rows).sum()
    }

    /// Append a batch
    ///
    /// # Errors
    ///
    /// Returns error if batch schema doesn't match existing batches
    pub fn append_batch(&mut self, batch: RecordBatch) -> Result<()> {
        if let Some(first) = self.batches.first() {
            let existing_schema = first.schema();
            if batch.schema() != existing_schema {
                return Err(Error::StorageError(format!(
                    "Schema mismatch: expected {:?}, got {:?}",
                    existing_schema,
                    batch.schema()
                )));
            }
        }

        self.batches.push(batch);
        Ok(())
    }

    /// Split the table into a feature matrix and the `target_column` vector.
    ///
    /// Every other column becomes a feature, in schema order.
    ///
    /// # Errors
    ///
    /// Returns error if the target column is missing, a column is not
    /// numeric, or a value is null.
    pub fn to_split(&self, target_column: &str) -> Result<Split> {
        let Some(schema) = self.batches.first().map(RecordBatch::schema) else {
            return Err(Error::StorageError("split contains no record batches".to_string()));
        };
        let target_index = target_index(&schema, target_column)?;

        let columns: Vec<String> = schema
            .fields()
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != target_index)
            .map(|(_, field)| field.name().clone())
            .collect();

        let rows = self.num_rows();
        let mut data = Vec::with_capacity(rows * columns.len());
        let mut target = Vec::with_capacity(rows);

        for batch in &self.batches {
            let numeric: Vec<Vec<f64>> = batch
                .columns()
                .iter()
                .zip(schema.fields())
                .map(|(array, field)| column_to_f64(field.name(), array))
                .collect::<Result<_>>()?;

            for row in 0..batch.num_rows() {
                for (i, column) in numeric.iter().enumerate() {
                    if i == target_index {
                        target.push(column[row]);
                    } else {
                        data.push(column[row]);
                    }
                }
            }
        }

        Ok(Split {
            features: FeatureMatrix { columns, rows, data },
            target,
        })
    }
}

fn target_index(schema: &SchemaRef, target_column: &str) -> Result<usize> {
    schema.index_of(target_column).map_err(|_| {
        Error::StorageError(format!("target column {target_column:?} not found"))
    })
}

#[allow(clippy::cast_precision_loss)]
fn column_to_f64(name: &str, array: &ArrayRef) -> Result<Vec<f64>> {
    if array.null_count() > 0 {
        return Err(Error::StorageError(format!(
            "column {name:?} contains {} null values",
            array.null_count()
        )));
    }

    let values = match array.data_type() {
        DataType::Float64 => downcast::<Float64Array>(name, array)?.values().to_vec(),
        DataType::Float32 => downcast::<Float32Array>(name, array)?
            .values()
            .iter()
            .map(|&v| f64::from(v))
            .collect(),
        DataType::Int64 => downcast::<Int64Array>(name, array)?
            .values()
            .iter()
            .map(|&v| v as f64)
            .collect(),
        DataType::Int32 => downcast::<Int32Array>(name, array)?
            .values()
            .iter()
            .map(|&v| f64::from(v))
            .collect(),
        other => {
            return Err(Error::StorageError(format!(
                "column {name:?} has unsupported type {other}"
            )))
        }
    };

    if let Some(row) = values.iter().position(|v| !v.is_finite()) {
        return Err(Error::StorageError(format!(
            "column {name:?} has non-finite value {} at row {row}",
            values[row]
        )));
    }
    Ok(values)
}

fn downcast<'a, T: 'static>(name: &str, array: &'a ArrayRef) -> Result<&'a T> {
    array
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| Error::StorageError(format!("column {name:?} could not be read")))
}

/// Dense row-major feature matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    columns: Vec<String>,
    rows: usize,
    data: Vec<f64>,
}

impl FeatureMatrix {
    /// Build a matrix from rows.
    ///
    /// # Errors
    /// Returns [`Error::InvalidInput`] if a row's width differs from `columns`.
    pub fn from_rows(columns: Vec<String>, rows: &[Vec<f64>]) -> Result<Self> {
        let mut data = Vec::with_capacity(rows.len() * columns.len());
        for (i, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(Error::InvalidInput(format!(
                    "row {i} has {} values, expected {}",
                    row.len(),
                    columns.len()
                )));
            }
            data.extend_from_slice(row);
        }
        Ok(Self {
            columns,
            rows: rows.len(),
            data,
        })
    }

    /// Feature column names.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of rows.
    #[must_use]
    pub const fn n_rows(&self) -> usize {
        self.rows
    }

    /// Number of feature columns.
    #[must_use]
    pub fn n_features(&self) -> usize {
        self.columns.len()
    }

    /// One row.
    #[must_use]
    pub fn row(&self, index: usize) -> &[f64] {
        let width = self.n_features();
        &self.data[index * width..(index + 1) * width]
    }

    /// Value at (`row`, `feature`).
    #[must_use]
    pub fn get(&self, row: usize, feature: usize) -> f64 {
        self.data[row * self.n_features() + feature]
    }
}

/// Features and target of one split.
#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    /// Feature matrix.
    pub features: FeatureMatrix,
    /// Target vector, one value per row.
    pub target: Vec<f64>,
}

impl Split {
    /// Number of rows.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.features.n_rows()
    }

    /// Whether the split has no rows.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The three splits every training routine works on.
#[derive(Debug, Clone)]
pub struct DatasetSplits {
    /// Fitting data.
    pub train: Split,
    /// Early stopping and `validation_rmse`.
    pub validation: Split,
    /// Held out, `test_rmse` only.
    pub test: Split,
}

/// Load `train.parquet`, `validation.parquet` and `test.parquet` from `dir`.
///
/// # Errors
///
/// Returns [`Error::StorageError`] if a file is missing or unreadable, the
/// target column is absent, a column is not numeric or contains nulls, a
/// split is empty, or the splits disagree on their feature columns.
pub fn load_splits(dir: impl AsRef<Path>, target_column: &str) -> Result<DatasetSplits> {
    let dir = dir.as_ref();
    let [train, validation, test] =
        SPLIT_FILES.map(|file| load_split(dir.join(file), target_column));
    let (train, validation, test) = (train?, validation?, test?);

    check_columns(&train, SPLIT_FILES[1], &validation)?;
    check_columns(&train, SPLIT_FILES[2], &test)?;

    Ok(DatasetSplits {
        train,
        validation,
        test,
    })
}

/// Load the train and validation splits only (the search never looks at test).
///
/// # Errors
/// Same as [`load_splits`], for the two files it reads.
pub fn load_training_splits(dir: impl AsRef<Path>, target_column: &str) -> Result<(Split, Split)> {
    let dir = dir.as_ref();
    let train = load_split(dir.join(SPLIT_FILES[0]), target_column)?;
    let validation = load_split(dir.join(SPLIT_FILES[1]), target_column)?;
    check_columns(&train, SPLIT_FILES[1], &validation)?;
    Ok((train, validation))
}

/// Load one non-empty split file.
///
/// # Errors
/// Returns [`Error::StorageError`] if the file is unusable or has no rows.
pub fn load_split(path: impl AsRef<Path>, target_column: &str) -> Result<Split> {
    let path = path.as_ref();
    let split = StorageEngine::load_parquet(path)?.to_split(target_column)?;
    if split.is_empty() {
        return Err(Error::StorageError(format!("split {} has no rows", path.display())));
    }
    debug!(
        path = %path.display(),
        rows = split.len(),
        features = split.features.n_features(),
        "Loaded split"
    );
    Ok(split)
}

fn check_columns(train: &Split, file: &str, split: &Split) -> Result<()> {
    if split.features.columns() == train.features.columns() {
        return Ok(());
    }
    Err(Error::StorageError(format!(
        "feature columns of {file} {:?} differ from {} {:?}",
        split.features.columns(),
        SPLIT_FILES[0],
        train.features.columns()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::datatypes::{Field, Schema};
    use parquet::arrow::ArrowWriter;
    use std::fs::File;
    use std::sync::Arc;

    fn create_test_batch(xs: &[i32], ys: &[f64]) -> RecordBatch {
        let schema = Schema::new(vec![
            Field::new("hour", DataType::Int32, false),
            Field::new("target", DataType::Float64, false),
            Field::new("distance", DataType::Float32, false),
        ]);
        #[allow(clippy::cast_precision_loss)]
        let distance = Float32Array::from_iter_values(xs.iter().map(|&x| x as f32 * 0.5));

        RecordBatch::try_new(
            Arc::new(schema),
            vec![
                Arc::new(Int32Array::from(xs.to_vec())),
                Arc::new(Float64Array::from(ys.to_vec())),
                Arc::new(distance),
            ],
        )
        .unwrap()
    }

    fn write_parquet(path: &Path, batch: &RecordBatch) {
        let file = File::create(path).unwrap();
        let mut writer = ArrowWriter::try_new(file, batch.schema(), None).unwrap();
        writer.write(batch).unwrap();
        writer.close().unwrap();
    }

    fn write_splits(dir: &Path) {
        for file in SPLIT_FILES {
            write_parquet(&dir.join(file), &create_test_batch(&[1, 2, 3], &[10.0, 20.0, 30.0]));
        }
    }

    #[test]
    fn test_to_split_separates_target() {
        let storage = StorageEngine::new(vec![create_test_batch(&[1, 2], &[5.0, 6.0])]);
        let split = storage.to_split("target").unwrap();

        assert_eq!(split.features.columns(), ["hour", "distance"]);
        assert_eq!(split.target, vec![5.0, 6.0]);
        assert_eq!(split.features.row(1), &[2.0, 1.0]);
    }

    #[test]
    fn test_to_split_concatenates_batches() {
        let mut storage = StorageEngine::new(vec![]);
        storage.append_batch(create_test_batch(&[1], &[1.0])).unwrap();
        storage.append_batch(create_test_batch(&[2, 3], &[2.0, 3.0])).unwrap();

        let split = storage.to_split("target").unwrap();
        assert_eq!(split.len(), 3);
        assert!((split.features.get(2, 0) - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_missing_target_column() {
        let storage = StorageEngine::new(vec![create_test_batch(&[1], &[1.0])]);
        let err = storage.to_split("delay").unwrap_err();
        assert!(err.to_string().contains("delay"));
    }

    #[test]
    fn test_append_batch_schema_validation() {
        let mut storage = StorageEngine::new(vec![]);
        storage.append_batch(create_test_batch(&[1], &[1.0])).unwrap();

        let incompatible_schema = Schema::new(vec![Field::new("other", DataType::Int32, false)]);
        let incompatible_batch = RecordBatch::try_new(
            Arc::new(incompatible_schema),
            vec![Arc::new(Int32Array::from(vec![1, 2, 3]))],
        )
        .unwrap();

        let result = storage.append_batch(incompatible_batch);
        assert!(result.unwrap_err().to_string().contains("Schema mismatch"));
    }

    #[test]
    fn test_nulls_are_rejected() {
        let schema = Schema::new(vec![
            Field::new("x", DataType::Float64, true),
            Field::new("target", DataType::Float64, false),
        ]);
        let batch = RecordBatch::try_new(
            Arc::new(schema),
            vec![
                Arc::new(Float64Array::from(vec![Some(1.0), None])),
                Arc::new(Float64Array::from(vec![1.0, 2.0])),
            ],
        )
        .unwrap();
        let err = StorageEngine::new(vec![batch]).to_split("target").unwrap_err();
        assert!(err.to_string().contains("null"));
    }

    #[test]
    fn test_nan_target_is_rejected() {
        let storage = StorageEngine::new(vec![create_test_batch(&[1, 2], &[5.0, f64::NAN])]);
        let err = storage.to_split("target").unwrap_err();
        assert!(matches!(err, Error::StorageError(_)));
        assert!(err.to_string().contains("\"target\""));
        assert!(err.to_string().contains("row 1"));
    }

    #[test]
    fn test_infinite_feature_is_rejected_at_load() {
        let dir = tempfile::tempdir().unwrap();
        write_splits(dir.path());

        let schema = Schema::new(vec![
            Field::new("hour", DataType::Int32, false),
            Field::new("target", DataType::Float64, false),
            Field::new("distance", DataType::Float32, false),
        ]);
        let batch = RecordBatch::try_new(
            Arc::new(schema),
            vec![
                Arc::new(Int32Array::from(vec![1, 2])),
                Arc::new(Float64Array::from(vec![1.0, 2.0])),
                Arc::new(Float32Array::from(vec![0.5, f32::INFINITY])),
            ],
        )
        .unwrap();
        write_parquet(&dir.path().join("validation.parquet"), &batch);

        let err = load_splits(dir.path(), "target").unwrap_err();
        assert!(matches!(err, Error::StorageError(_)));
        assert!(err.to_string().contains("distance"));
    }

    #[test]
    fn test_text_columns_are_rejected() {
        use arrow::array::StringArray;

        let schema = Schema::new(vec![
            Field::new("route", DataType::Utf8, false),
            Field::new("target", DataType::Float64, false),
        ]);
        let batch = RecordBatch::try_new(
            Arc::new(schema),
            vec![
                Arc::new(StringArray::from(vec!["M15"])),
                Arc::new(Float64Array::from(vec![1.0])),
            ],
        )
        .unwrap();
        assert!(StorageEngine::new(vec![batch]).to_split("target").is_err());
    }

    #[test]
    fn test_load_splits_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        write_splits(dir.path());

        let splits = load_splits(dir.path(), "target").unwrap();
        assert_eq!(splits.train.len(), 3);
        assert_eq!(splits.validation.target, vec![10.0, 20.0, 30.0]);
        assert_eq!(splits.test.features.n_features(), 2);
    }

    #[test]
    fn test_load_splits_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        write_splits(dir.path());
        std::fs::remove_file(dir.path().join("test.parquet")).unwrap();

        let err = load_splits(dir.path(), "target").unwrap_err();
        assert!(matches!(err, Error::StorageError(_)));
        assert!(err.to_string().contains("test.parquet"));
    }

    #[test]
    fn test_load_splits_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        write_splits(dir.path());
        std::fs::write(dir.path().join("validation.parquet"), b"not parquet").unwrap();

        assert!(load_splits(dir.path(), "target").is_err());
    }

    #[test]
    fn test_load_splits_feature_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        write_splits(dir.path());

        let schema = Schema::new(vec![
            Field::new("minute", DataType::Int64, false),
            Field::new("target", DataType::Float64, false),
        ]);
        let batch = RecordBatch::try_new(
            Arc::new(schema),
            vec![
                Arc::new(Int64Array::from(vec![1, 2])),
                Arc::new(Float64Array::from(vec![1.0, 2.0])),
            ],
        )
        .unwrap();
        write_parquet(&dir.path().join("test.parquet"), &batch);

        let err = load_splits(dir.path(), "target").unwrap_err();
        assert!(err.to_string().contains("differ"));
    }

    #[test]
    fn test_training_splits_ignore_test_file() {
        let dir = tempfile::tempdir().unwrap();
        write_splits(dir.path());
        std::fs::remove_file(dir.path().join("test.parquet")).unwrap();

        let (train, validation) = load_training_splits(dir.path(), "target").unwrap();
        assert_eq!(train.len(), 3);
        assert_eq!(validation.len(), 3);
    }

    #[test]
    fn test_feature_matrix_from_rows_checks_width() {
        let columns = vec!["a".to_string(), "b".to_string()];
        assert!(FeatureMatrix::from_rows(columns.clone(), &[vec![1.0, 2.0]]).is_ok());
        assert!(FeatureMatrix::from_rows(columns, &[vec![1.0]]).is_err());
    }
}
