
use super::{ChunkMetadata, RetrievedPassage, VectorRecord};
use crate::config::{Config, validate_collection_name};
use crate::{RagError, Result};
use arrow::array::{
    Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray, UInt32Array,
    UInt64Array,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use futures::TryStreamExt;
use itertools::Itertools;
use lancedb::query::ExecutableQuery;
use lancedb::{Connection, Table};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Named vector collections persisted in a LanceDB directory
///
/// Each collection is one LanceDB table. Queries are exact: every record is
/// scored by cosine distance, so results do not depend on index state.
pub struct VectorStore {
    connection: Connection,
    path: PathBuf,
    /// Serializes writes so the seq assignment and the commit are not interleaved
    write_lock: Mutex<()>,
}

/// A scored row before ranking
struct Candidate {
    distance: f32,
    seq: u64,
    passage: RetrievedPassage,
}

impl VectorStore {
    /// Open the store configured under `<base_dir>/vectors`
    #[inline]
    pub async fn new(config: &Config) -> Result<Self> {
        Self::open(&config.vector_database_path()).await
    }

    /// Open or create a store at the given directory
    #[inline]
    pub async fn open(path: &Path) -> Result<Self> {
        debug!("Initializing LanceDB at path: {:?}", path);

        std::fs::create_dir_all(path).map_err(|e| {
            RagError::Storage(format!("Failed to create vector database directory: {}", e))
        })?;

        let uri = format!("file://{}", path.display());
        let connection = lancedb::connect(&uri).execute().await.map_err(|e| {
            error!("Failed to connect to LanceDB: {}", e);
            RagError::Storage(format!("Failed to connect to LanceDB: {}", e))
        })?;

        info!("Vector store opened at {}", path.display());
        Ok(Self {
            connection,
            path: path.to_path_buf(),
            write_lock: Mutex::new(()),
        })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Names of all collections, sorted
    #[inline]
    pub async fn list_collections(&self) -> Result<Vec<String>> {
        let mut names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| RagError::Storage(format!("Failed to list tables: {}", e)))?;
        names.sort();
        Ok(names)
    }

    /// Create an empty collection for vectors of `dimension` components
    ///
    /// Creating an existing collection with the same dimension is a no-op.
    #[inline]
    pub async fn create_collection(&self, collection: &str, dimension: usize) -> Result<()> {
        check_collection_name(collection)?;
        if dimension == 0 {
            return Err(RagError::InvalidArgument(
                "Vector dimension must be greater than 0".to_string(),
            ));
        }

        let _guard = self.write_lock.lock().await;
        if self.collection_exists(collection).await? {
            let existing = self.collection_dimension(collection).await?;
            if existing != dimension {
                return Err(RagError::InvalidArgument(format!(
                    "Collection '{}' already exists with dimension {}, requested {}",
                    collection, existing, dimension
                )));
            }
            debug!("Collection '{}' already exists", collection);
            return Ok(());
        }

        self.create_empty(collection, dimension).await
    }

    /// Vector length shared by every record of the collection
    #[inline]
    pub async fn collection_dimension(&self, collection: &str) -> Result<usize> {
        let table = self.open_collection(collection).await?;
        table_dimension(&table, collection).await
    }

    /// Insert or replace records by id as one commit
    ///
    /// The collection is created on first use with the dimension of the
    /// first record. If any record has a different dimension nothing is
    /// written. When an id repeats within `records` the last occurrence wins.
    /// Returns the number of distinct records written.
    #[inline]
    pub async fn upsert(&self, collection: &str, records: Vec<VectorRecord>) -> Result<usize> {
        self.write(collection, records, &[]).await
    }

    /// Make `records` the complete content of the documents named in `sources`
    ///
    /// Behaves like [`upsert`](Self::upsert), and in the same commit deletes
    /// every record from one of `sources` whose id is not in `records`. A
    /// document re-ingested with fewer chunks therefore keeps no stale passages.
    #[inline]
    pub async fn replace_documents(
        &self,
        collection: &str,
        sources: &[String],
        records: Vec<VectorRecord>,
    ) -> Result<usize> {
        self.write(collection, records, sources).await
    }

    async fn write(
        &self,
        collection: &str,
        records: Vec<VectorRecord>,
        replaced_sources: &[String],
    ) -> Result<usize> {
        check_collection_name(collection)?;
        if records.is_empty() && replaced_sources.is_empty() {
            debug!("No records to upsert into '{}'", collection);
            return Ok(0);
        }

        let records = deduplicate(records);
        let _guard = self.write_lock.lock().await;

        let table = match self.open_collection(collection).await {
            Ok(table) => table,
            Err(RagError::NotFound(_)) if records.is_empty() => {
                debug!("Nothing to replace in missing collection '{}'", collection);
                return Ok(0);
            }
            Err(RagError::NotFound(_)) => return self.create_with_records(collection, &records).await,
            Err(e) => return Err(e),
        };

        let prune_filter = source_filter(replaced_sources);
        if records.is_empty() {
            if let Some(filter) = prune_filter {
                table
                    .delete(&filter)
                    .await
                    .map_err(|e| RagError::Storage(format!("Failed to delete records: {}", e)))?;
                info!("Removed records matching {} from '{}'", filter, collection);
            }
            return Ok(0);
        }

        let dimension = table_dimension(&table, collection).await?;
        check_dimensions(collection, &records, dimension)?;

        let (existing_seqs, mut next_seq) = read_sequence_numbers(&table).await?;
        let seqs: Vec<u64> = records
            .iter()
            .map(|record| {
                existing_seqs.get(&record.id).copied().unwrap_or_else(|| {
                    let seq = next_seq;
                    next_seq += 1;
                    seq
                })
            })
            .collect();

        let batch = create_record_batch(&records, &seqs, dimension)?;
        let schema = batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(batch)), schema);

        let mut merge = table.merge_insert(&["id"]);
        merge
            .when_matched_update_all(None)
            .when_not_matched_insert_all();
        if let Some(filter) = prune_filter {
            merge.when_not_matched_by_source_delete(Some(filter));
        }
        merge
            .execute(Box::new(reader))
            .await
            .map_err(|e| RagError::Storage(format!("Failed to upsert records: {}", e)))?;

        info!(
            "Upserted {} records into collection '{}'",
            records.len(),
            collection
        );
        Ok(records.len())
    }

    /// First write to a collection: the table and its rows land in one commit
    async fn create_with_records(&self, collection: &str, records: &[VectorRecord]) -> Result<usize> {
        let dimension = records.first().map_or(0, |record| record.vector.len());
        check_dimensions(collection, records, dimension)?;

        let seqs: Vec<u64> = (0..records.len() as u64).collect();
        let batch = create_record_batch(records, &seqs, dimension)?;
        let schema = batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(batch)), schema);

        self.connection
            .create_table(collection, reader)
            .execute()
            .await
            .map_err(|e| RagError::Storage(format!("Failed to create table: {}", e)))?;

        info!(
            "Created collection '{}' with {} dimensions and {} records",
            collection,
            dimension,
            records.len()
        );
        Ok(records.len())
    }

    /// The `k` records nearest to `query_vector` by cosine distance
    ///
    /// Ties are broken by insertion order. Returns all records when the
    /// collection holds fewer than `k`.
    #[inline]
    pub async fn query(
        &self,
        collection: &str,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedPassage>> {
        check_collection_name(collection)?;
        if k == 0 {
            return Err(RagError::InvalidArgument(
                "k must be greater than 0".to_string(),
            ));
        }

        let table = self.open_collection(collection).await?;
        let dimension = table_dimension(&table, collection).await?;
        if query_vector.len() != dimension {
            return Err(RagError::InvalidArgument(format!(
                "Query vector has dimension {}, collection '{}' expects {}",
                query_vector.len(),
                collection,
                dimension
            )));
        }

        debug!(
            "Searching collection '{}' for {} nearest records",
            collection, k
        );

        let mut results = table
            .query()
            .execute()
            .await
            .map_err(|e| RagError::Storage(format!("Failed to execute search: {}", e)))?;

        let mut candidates = Vec::new();
        while let Some(batch) = results
            .try_next()
            .await
            .map_err(|e| RagError::Storage(format!("Failed to read result stream: {}", e)))?
        {
            candidates.extend(score_batch(&batch, query_vector)?);
        }

        candidates.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| a.seq.cmp(&b.seq))
        });
        candidates.truncate(k);

        debug!(
            "Query on '{}' returned {} passages",
            collection,
            candidates.len()
        );
        Ok(candidates
            .into_iter()
            .map(|candidate| candidate.passage)
            .collect())
    }

    /// Number of records in a collection
    #[inline]
    pub async fn count(&self, collection: &str) -> Result<usize> {
        let table = self.open_collection(collection).await?;
        table
            .count_rows(None)
            .await
            .map_err(|e| RagError::Storage(format!("Failed to count rows: {}", e)))
    }

    /// Remove a collection and all of its records
    #[inline]
    pub async fn drop_collection(&self, collection: &str) -> Result<()> {
        check_collection_name(collection)?;
        let _guard = self.write_lock.lock().await;
        if !self.collection_exists(collection).await? {
            return Err(not_found(collection));
        }

        self.connection
            .drop_table(collection)
            .await
            .map_err(|e| RagError::Storage(format!("Failed to drop table: {}", e)))?;

        info!("Dropped collection '{}'", collection);
        Ok(())
    }

    /// Compact a collection's data files
    #[inline]
    pub async fn optimize(&self, collection: &str) -> Result<()> {
        debug!("Optimizing collection '{}'", collection);
        let table = self.open_collection(collection).await?;
        let _guard = self.write_lock.lock().await;

        table
            .optimize(lancedb::table::OptimizeAction::All)
            .await
            .map_err(|e| RagError::Storage(format!("Failed to optimize table: {}", e)))?;

        info!("Collection '{}' optimization completed", collection);
        Ok(())
    }

    async fn collection_exists(&self, collection: &str) -> Result<bool> {
        let names = self.list_collections().await?;
        Ok(names.iter().any(|name| name == collection))
    }

    async fn open_collection(&self, collection: &str) -> Result<Table> {
        check_collection_name(collection)?;
        if !self.collection_exists(collection).await? {
            return Err(not_found(collection));
        }

        // Listed but not yet committed is the state before the first write
        self.connection
            .open_table(collection)
            .execute()
            .await
            .map_err(|e| match e {
                lancedb::Error::TableNotFound { .. } => not_found(collection),
                other => RagError::Storage(format!("Failed to open table: {}", other)),
            })
    }

    async fn create_empty(&self, collection: &str, dimension: usize) -> Result<()> {
        self.connection
            .create_empty_table(collection, create_schema(dimension))
            .execute()
            .await
            .map_err(|e| RagError::Storage(format!("Failed to create table: {}", e)))?;

        info!(
            "Created collection '{}' with {} dimensions",
            collection, dimension
        );
        Ok(())
    }
}

/// Cosine distance `1 - (a·b)/(|a||b|)`; 1 when either vector has zero norm
#[inline]
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let (dot, norm_a, norm_b) = a
        .iter()
        .zip(b)
        .fold((0.0_f32, 0.0_f32, 0.0_f32), |(dot, na, nb), (x, y)| {
            (x.mul_add(*y, dot), x.mul_add(*x, na), y.mul_add(*y, nb))
        });

    if norm_a <= 0.0 || norm_b <= 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}

fn check_collection_name(collection: &str) -> Result<()> {
    validate_collection_name(collection).map_err(|e| RagError::InvalidArgument(e.to_string()))
}

fn check_dimensions(collection: &str, records: &[VectorRecord], dimension: usize) -> Result<()> {
    match records
        .iter()
        .find(|record| record.vector.len() != dimension || dimension == 0)
    {
        Some(bad) => Err(RagError::Storage(format!(
            "Record '{}' has dimension {}, collection '{}' expects {}",
            bad.id,
            bad.vector.len(),
            collection,
            dimension
        ))),
        None => Ok(()),
    }
}

/// SQL predicate matching records of any of `sources`
fn source_filter(sources: &[String]) -> Option<String> {
    if sources.is_empty() {
        return None;
    }
    let quoted = sources
        .iter()
        .map(|source| format!("'{}'", source.replace('\'', "''")))
        .join(", ");
    Some(format!("source IN ({})", quoted))
}

fn not_found(collection: &str) -> RagError {
    RagError::NotFound(format!("Collection '{}' does not exist", collection))
}

/// Keep one record per id: content of the last occurrence, position of the first
fn deduplicate(records: Vec<VectorRecord>) -> Vec<VectorRecord> {
    let total = records.len();
    let mut positions: HashMap<String, usize> = HashMap::with_capacity(total);
    let mut unique: Vec<VectorRecord> = Vec::with_capacity(total);

    for record in records {
        match positions.get(&record.id) {
            Some(&position) => unique[position] = record,
            None => {
                positions.insert(record.id.clone(), unique.len());
                unique.push(record);
            }
        }
    }

    if unique.len() < total {
        warn!(
            "Collapsed {} duplicate ids within one upsert",
            total - unique.len()
        );
    }
    unique
}

fn create_schema(dimension: usize) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("seq", DataType::UInt64, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, false)),
                dimension as i32,
            ),
            false,
        ),
        Field::new("text", DataType::Utf8, false),
        Field::new("source", DataType::Utf8, false),
        Field::new("page_index", DataType::UInt32, false),
        Field::new("chunk_index", DataType::UInt32, false),
    ]))
}

async fn table_dimension(table: &Table, collection: &str) -> Result<usize> {
    let schema = table
        .schema()
        .await
        .map_err(|e| RagError::Storage(format!("Failed to get table schema: {}", e)))?;

    vector_dimension(&schema).ok_or_else(|| {
        RagError::Storage(format!(
            "Could not determine vector dimension of collection '{}'",
            collection
        ))
    })
}

fn vector_dimension(schema: &Schema) -> Option<usize> {
    schema
        .fields()
        .iter()
        .find(|field| field.name() == "vector")
        .and_then(|field| match field.data_type() {
            DataType::FixedSizeList(_, size) => usize::try_from(*size).ok(),
            _ => None,
        })
}

fn create_record_batch(
    records: &[VectorRecord],
    seqs: &[u64],
    dimension: usize,
) -> Result<RecordBatch> {
    let mut flat_values = Vec::with_capacity(records.len() * dimension);
    for record in records {
        flat_values.extend_from_slice(&record.vector);
    }

    let field = Arc::new(Field::new("item", DataType::Float32, false));
    let vector_array = FixedSizeListArray::try_new(
        field,
        dimension as i32,
        Arc::new(Float32Array::from(flat_values)),
        None,
    )
    .map_err(|e| RagError::Storage(format!("Failed to create vector array: {}", e)))?;

    let arrays: Vec<Arc<dyn Array>> = vec![
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.id.as_str()),
        )),
        Arc::new(UInt64Array::from(seqs.to_vec())),
        Arc::new(vector_array),
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.text.as_str()),
        )),
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.metadata.source.as_str()),
        )),
        Arc::new(UInt32Array::from_iter_values(
            records.iter().map(|r| r.metadata.page_index),
        )),
        Arc::new(UInt32Array::from_iter_values(
            records.iter().map(|r| r.metadata.chunk_index),
        )),
    ];

    RecordBatch::try_new(create_schema(dimension), arrays)
        .map_err(|e| RagError::Storage(format!("Failed to create record batch: {}", e)))
}

/// Existing seq per id, plus the next unused seq
async fn read_sequence_numbers(table: &Table) -> Result<(HashMap<String, u64>, u64)> {
    let mut stream = table
        .query()
        .execute()
        .await
        .map_err(|e| RagError::Storage(format!("Failed to scan table: {}", e)))?;

    let mut seqs = HashMap::new();
    let mut next_seq = 0;
    while let Some(batch) = stream
        .try_next()
        .await
        .map_err(|e| RagError::Storage(format!("Failed to read table stream: {}", e)))?
    {
        let ids = column::<StringArray>(&batch, "id")?;
        let batch_seqs = column::<UInt64Array>(&batch, "seq")?;
        for row in 0..batch.num_rows() {
            let seq = batch_seqs.value(row);
            next_seq = next_seq.max(seq + 1);
            seqs.insert(ids.value(row).to_string(), seq);
        }
    }

    Ok((seqs, next_seq))
}

fn score_batch(batch: &RecordBatch, query_vector: &[f32]) -> Result<Vec<Candidate>> {
    let seqs = column::<UInt64Array>(batch, "seq")?;
    let vectors = column::<FixedSizeListArray>(batch, "vector")?;
    let texts = column::<StringArray>(batch, "text")?;
    let sources = column::<StringArray>(batch, "source")?;
    let page_indices = column::<UInt32Array>(batch, "page_index")?;
    let chunk_indices = column::<UInt32Array>(batch, "chunk_index")?;

    let mut candidates = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let vector = vectors.value(row);
        let components = vector
            .as_any()
            .downcast_ref::<Float32Array>()
            .ok_or_else(|| RagError::Storage("Invalid vector column type".to_string()))?;

        let distance = cosine_distance(components.values(), query_vector);
        candidates.push(Candidate {
            distance,
            seq: seqs.value(row),
            passage: RetrievedPassage {
                text: texts.value(row).to_string(),
                metadata: ChunkMetadata {
                    source: sources.value(row).to_string(),
                    page_index: page_indices.value(row),
                    chunk_index: chunk_indices.value(row),
                },
                score: 1.0 - distance,
                distance,
            },
        });
    }

    Ok(candidates)
}

fn column<'a, T: Array + 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .ok_or_else(|| RagError::Storage(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| RagError::Storage(format!("Invalid {} column type", name)))
}
