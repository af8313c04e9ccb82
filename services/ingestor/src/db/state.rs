//! Postgres mirror of the committed cluster state.
//!
//! Each commit is written in one database transaction: deletes first
//! (relations before owners), then upserts (owners before relations), then
//! the derived aggregate columns, then the version row. A resync commit
//! empties every table and writes the full state instead of the delta.
//! Startup reads the same tables back to resume where the previous process
//! stopped.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clusterboard_model::{
    Allocation, Job, JobId, JobResource, JobStatus, Node, NodeName, NodePartition, NodeResource,
    NodeStatus, Partition, PartitionName, PartitionStatus, ResourceKind, Snapshot,
};
use clusterboard_reconcile::{
    ChangeSet, ClusterState, Commit, CommitSink, SinkError, Stamp, StateDigest, Version,
};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Postgres, Row, Transaction};
use tracing::{debug, info, instrument};

use super::DbError;

/// Commit sink that mirrors every commit into Postgres.
#[derive(Clone)]
pub struct PgStateSink {
    pool: PgPool,
}

impl PgStateSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[instrument(skip(self, commit), fields(version = %commit.stamp.version, resync = commit.resync))]
    async fn write(&self, commit: Commit<'_>) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await.map_err(DbError::Query)?;

        if commit.resync {
            let full = ChangeSet::compute(
                &ClusterState::default(),
                &commit.state.to_snapshot(commit.stamp.observed_at),
            );
            clear_tables(&mut tx).await?;
            upsert_rows(&mut tx, &full).await?;
            info!(rows = commit.state.row_count(), "Rewriting mirror in full");
        } else {
            delete_rows(&mut tx, commit.changes).await?;
            upsert_rows(&mut tx, commit.changes).await?;
        }
        write_aggregates(&mut tx, commit.state).await?;
        write_stamp(&mut tx, commit.stamp).await?;

        tx.commit().await.map_err(DbError::Query)?;
        debug!("Commit mirrored to database");
        Ok(())
    }
}

#[async_trait]
impl CommitSink for PgStateSink {
    async fn persist(&self, commit: Commit<'_>) -> Result<(), SinkError> {
        self.write(commit).await.map_err(SinkError::from)
    }
}

/// Relations before owners.
const MIRROR_TABLES: [&str; 7] = [
    "job_allocations",
    "job_resources",
    "jobs",
    "node_partitions",
    "node_resources",
    "nodes",
    "partitions",
];

async fn clear_tables(tx: &mut Transaction<'_, Postgres>) -> Result<(), DbError> {
    for table in MIRROR_TABLES {
        sqlx::query(&format!("DELETE FROM {table}"))
            .execute(&mut **tx)
            .await
            .map_err(DbError::Query)?;
    }
    Ok(())
}

async fn delete_rows(
    tx: &mut Transaction<'_, Postgres>,
    changes: &ChangeSet,
) -> Result<(), DbError> {
    for (job, node, kind) in &changes.allocations.deleted {
        sqlx::query("DELETE FROM job_allocations WHERE job = $1 AND node = $2 AND kind = $3")
            .bind(job.as_str())
            .bind(node.as_str())
            .bind(kind.as_str())
            .execute(&mut **tx)
            .await
            .map_err(DbError::Query)?;
    }
    for (job, kind) in &changes.job_resources.deleted {
        sqlx::query("DELETE FROM job_resources WHERE job = $1 AND kind = $2")
            .bind(job.as_str())
            .bind(kind.as_str())
            .execute(&mut **tx)
            .await
            .map_err(DbError::Query)?;
    }
    for job in &changes.jobs.deleted {
        sqlx::query("DELETE FROM jobs WHERE job_id = $1")
            .bind(job.as_str())
            .execute(&mut **tx)
            .await
            .map_err(DbError::Query)?;
    }
    for (node, partition) in &changes.node_partitions.deleted {
        sqlx::query("DELETE FROM node_partitions WHERE node = $1 AND partition = $2")
            .bind(node.as_str())
            .bind(partition.as_str())
            .execute(&mut **tx)
            .await
            .map_err(DbError::Query)?;
    }
    for (node, kind) in &changes.node_resources.deleted {
        sqlx::query("DELETE FROM node_resources WHERE node = $1 AND kind = $2")
            .bind(node.as_str())
            .bind(kind.as_str())
            .execute(&mut **tx)
            .await
            .map_err(DbError::Query)?;
    }
    for node in &changes.nodes.deleted {
        sqlx::query("DELETE FROM nodes WHERE name = $1")
            .bind(node.as_str())
            .execute(&mut **tx)
            .await
            .map_err(DbError::Query)?;
    }
    for partition in &changes.partitions.deleted {
        sqlx::query("DELETE FROM partitions WHERE name = $1")
            .bind(partition.as_str())
            .execute(&mut **tx)
            .await
            .map_err(DbError::Query)?;
    }
    Ok(())
}

async fn upsert_rows(
    tx: &mut Transaction<'_, Postgres>,
    changes: &ChangeSet,
) -> Result<(), DbError> {
    for partition in changes.partitions.writes() {
        upsert_partition(tx, partition).await?;
    }
    for node in changes.nodes.writes() {
        upsert_node(tx, node).await?;
    }
    for membership in changes.node_partitions.writes() {
        sqlx::query(
            r#"
            INSERT INTO node_partitions (node, partition)
            VALUES ($1, $2)
            ON CONFLICT (node, partition) DO NOTHING
            "#,
        )
        .bind(membership.node.as_str())
        .bind(membership.partition.as_str())
        .execute(&mut **tx)
        .await
        .map_err(DbError::Query)?;
    }
    for resource in changes.node_resources.writes() {
        sqlx::query(
            r#"
            INSERT INTO node_resources (node, kind, total, available)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (node, kind) DO UPDATE SET
                total = EXCLUDED.total,
                available = EXCLUDED.available
            "#,
        )
        .bind(resource.node.as_str())
        .bind(resource.kind.as_str())
        .bind(to_db(resource.total, "node_resources.total")?)
        .bind(to_db(resource.available, "node_resources.available")?)
        .execute(&mut **tx)
        .await
        .map_err(DbError::Query)?;
    }
    for job in changes.jobs.writes() {
        upsert_job(tx, job).await?;
    }
    for resource in changes.job_resources.writes() {
        sqlx::query(
            r#"
            INSERT INTO job_resources (job, kind, requested, allocated)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (job, kind) DO UPDATE SET
                requested = EXCLUDED.requested,
                allocated = EXCLUDED.allocated
            "#,
        )
        .bind(resource.job.as_str())
        .bind(resource.kind.as_str())
        .bind(to_db(resource.requested, "job_resources.requested")?)
        .bind(to_db(resource.allocated, "job_resources.allocated")?)
        .execute(&mut **tx)
        .await
        .map_err(DbError::Query)?;
    }
    for allocation in changes.allocations.writes() {
        sqlx::query(
            r#"
            INSERT INTO job_allocations (job, node, kind, used)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (job, node, kind) DO UPDATE SET
                used = EXCLUDED.used
            "#,
        )
        .bind(allocation.job.as_str())
        .bind(allocation.node.as_str())
        .bind(allocation.kind.as_str())
        .bind(to_db(allocation.used, "job_allocations.used")?)
        .execute(&mut **tx)
        .await
        .map_err(DbError::Query)?;
    }
    Ok(())
}

async fn upsert_partition(
    tx: &mut Transaction<'_, Postgres>,
    partition: &Partition,
) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO partitions (name, status, qos, allow_qos, updated_at)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (name) DO UPDATE SET
            status = EXCLUDED.status,
            qos = EXCLUDED.qos,
            allow_qos = EXCLUDED.allow_qos,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(partition.name.as_str())
    .bind(partition.status.as_str())
    .bind(partition.qos.as_deref())
    .bind(&partition.allow_qos)
    .bind(partition.updated_at)
    .execute(&mut **tx)
    .await
    .map_err(DbError::Query)?;
    Ok(())
}

async fn upsert_node(tx: &mut Transaction<'_, Postgres>, node: &Node) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO nodes (name, status, cpus, memory_mb, updated_at)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (name) DO UPDATE SET
            status = EXCLUDED.status,
            cpus = EXCLUDED.cpus,
            memory_mb = EXCLUDED.memory_mb,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(node.name.as_str())
    .bind(node.status.as_str())
    .bind(to_db(node.cpus, "nodes.cpus")?)
    .bind(to_db(node.memory_mb, "nodes.memory_mb")?)
    .bind(node.updated_at)
    .execute(&mut **tx)
    .await
    .map_err(DbError::Query)?;
    Ok(())
}

async fn upsert_job(tx: &mut Transaction<'_, Postgres>, job: &Job) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO jobs (job_id, user_name, partition, status, time_limit, start_time, submit_time, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (job_id) DO UPDATE SET
            user_name = EXCLUDED.user_name,
            partition = EXCLUDED.partition,
            status = EXCLUDED.status,
            time_limit = EXCLUDED.time_limit,
            start_time = EXCLUDED.start_time,
            submit_time = EXCLUDED.submit_time,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(job.job_id.as_str())
    .bind(&job.user)
    .bind(job.partition.as_str())
    .bind(job.status.as_str())
    .bind(job.time_limit.as_deref())
    .bind(job.start_time)
    .bind(job.submit_time)
    .bind(job.updated_at)
    .execute(&mut **tx)
    .await
    .map_err(DbError::Query)?;
    Ok(())
}

/// Rewrite every derived aggregate column from the committed state.
async fn write_aggregates(
    tx: &mut Transaction<'_, Postgres>,
    state: &ClusterState,
) -> Result<(), DbError> {
    for (name, usage) in state.node_usages() {
        sqlx::query(
            r#"
            UPDATE nodes
            SET cpus_alloc = $2, cpus_idle = $3, memory_alloc_mb = $4, memory_free_mb = $5
            WHERE name = $1
            "#,
        )
        .bind(name.as_str())
        .bind(to_db(usage.cpus_alloc, "nodes.cpus_alloc")?)
        .bind(to_db(usage.cpus_idle, "nodes.cpus_idle")?)
        .bind(to_db(usage.memory_alloc_mb, "nodes.memory_alloc_mb")?)
        .bind(to_db(usage.memory_free_mb, "nodes.memory_free_mb")?)
        .execute(&mut **tx)
        .await
        .map_err(DbError::Query)?;
    }

    for (name, summary) in state.partition_summaries() {
        let figures = &summary.figures;
        sqlx::query(
            r#"
            UPDATE partitions
            SET node_count = $2,
                cpus_total = $3, cpus_alloc = $4, cpus_idle = $5,
                memory_total_mb = $6, memory_alloc_mb = $7, memory_free_mb = $8
            WHERE name = $1
            "#,
        )
        .bind(name.as_str())
        .bind(to_db(summary.node_count, "partitions.node_count")?)
        .bind(to_db(figures.cpus_total, "partitions.cpus_total")?)
        .bind(to_db(figures.cpus_alloc, "partitions.cpus_alloc")?)
        .bind(to_db(figures.cpus_idle, "partitions.cpus_idle")?)
        .bind(to_db(figures.memory_total_mb, "partitions.memory_total_mb")?)
        .bind(to_db(figures.memory_alloc_mb, "partitions.memory_alloc_mb")?)
        .bind(to_db(figures.memory_free_mb, "partitions.memory_free_mb")?)
        .execute(&mut **tx)
        .await
        .map_err(DbError::Query)?;
    }
    Ok(())
}

async fn write_stamp(tx: &mut Transaction<'_, Postgres>, stamp: &Stamp) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO cluster_state_version (id, version, observed_at, committed_at, digest)
        VALUES (1, $1, $2, $3, $4)
        ON CONFLICT (id) DO UPDATE SET
            version = EXCLUDED.version,
            observed_at = EXCLUDED.observed_at,
            committed_at = EXCLUDED.committed_at,
            digest = EXCLUDED.digest
        "#,
    )
    .bind(to_db(stamp.version.get(), "cluster_state_version.version")?)
    .bind(stamp.observed_at)
    .bind(stamp.committed_at)
    .bind(stamp.digest.as_str())
    .execute(&mut **tx)
    .await
    .map_err(DbError::Query)?;
    Ok(())
}

/// Read the mirrored state back, or `None` if nothing was ever committed.
///
/// All tables are read inside one repeatable-read transaction so the result
/// is a single commit's rows.
#[instrument(skip(pool))]
pub async fn load_committed_state(pool: &PgPool) -> Result<Option<(Snapshot, Stamp)>, DbError> {
    let mut tx = pool.begin().await.map_err(DbError::Query)?;
    sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
        .execute(&mut *tx)
        .await
        .map_err(DbError::Query)?;

    let stamp_row = sqlx::query(
        "SELECT version, observed_at, committed_at, digest FROM cluster_state_version WHERE id = 1",
    )
    .fetch_optional(&mut *tx)
    .await
    .map_err(DbError::Query)?;

    let Some(row) = stamp_row else {
        info!("No committed state in database");
        return Ok(None);
    };
    let stamp = stamp_from_row(&row)?;

    let mut snapshot = Snapshot::empty(stamp.observed_at);
    snapshot.partitions = fetch(
        &mut tx,
        "SELECT name, status, qos, allow_qos, updated_at FROM partitions ORDER BY name",
        partition_from_row,
    )
    .await?;
    snapshot.nodes = fetch(
        &mut tx,
        "SELECT name, status, cpus, memory_mb, updated_at FROM nodes ORDER BY name",
        node_from_row,
    )
    .await?;
    snapshot.node_partitions = fetch(
        &mut tx,
        "SELECT node, partition FROM node_partitions ORDER BY node, partition",
        membership_from_row,
    )
    .await?;
    snapshot.node_resources = fetch(
        &mut tx,
        "SELECT node, kind, total, available FROM node_resources ORDER BY node, kind",
        node_resource_from_row,
    )
    .await?;
    snapshot.jobs = fetch(
        &mut tx,
        "SELECT job_id, user_name, partition, status, time_limit, start_time, submit_time, updated_at FROM jobs ORDER BY job_id",
        job_from_row,
    )
    .await?;
    snapshot.job_resources = fetch(
        &mut tx,
        "SELECT job, kind, requested, allocated FROM job_resources ORDER BY job, kind",
        job_resource_from_row,
    )
    .await?;
    snapshot.allocations = fetch(
        &mut tx,
        "SELECT job, node, kind, used FROM job_allocations ORDER BY job, node, kind",
        allocation_from_row,
    )
    .await?;

    tx.commit().await.map_err(DbError::Query)?;

    info!(
        version = %stamp.version,
        rows = snapshot.row_count(),
        "Loaded committed state from database"
    );
    Ok(Some((snapshot, stamp)))
}

async fn fetch<T>(
    tx: &mut Transaction<'_, Postgres>,
    sql: &str,
    decode: fn(&PgRow) -> Result<T, DbError>,
) -> Result<Vec<T>, DbError> {
    let rows = sqlx::query(sql)
        .fetch_all(&mut **tx)
        .await
        .map_err(DbError::Query)?;
    rows.iter().map(decode).collect()
}

fn stamp_from_row(row: &PgRow) -> Result<Stamp, DbError> {
    let version: i64 = get(row, "cluster_state_version", "version")?;
    let digest: String = get(row, "cluster_state_version", "digest")?;
    Ok(Stamp {
        version: Version::new(from_db(version, "cluster_state_version.version")?),
        observed_at: get(row, "cluster_state_version", "observed_at")?,
        committed_at: get(row, "cluster_state_version", "committed_at")?,
        digest: StateDigest::from_stored(digest),
    })
}

fn partition_from_row(row: &PgRow) -> Result<Partition, DbError> {
    const TABLE: &str = "partitions";
    let status: String = get(row, TABLE, "status")?;
    Ok(Partition {
        name: key(row, TABLE, "name", PartitionName::new)?,
        status: PartitionStatus::from(status.as_str()),
        qos: get(row, TABLE, "qos")?,
        allow_qos: get(row, TABLE, "allow_qos")?,
        updated_at: get(row, TABLE, "updated_at")?,
    })
}

fn node_from_row(row: &PgRow) -> Result<Node, DbError> {
    const TABLE: &str = "nodes";
    let status: String = get(row, TABLE, "status")?;
    Ok(Node {
        name: key(row, TABLE, "name", NodeName::new)?,
        status: NodeStatus::from(status.as_str()),
        cpus: from_db(get(row, TABLE, "cpus")?, "nodes.cpus")?,
        memory_mb: from_db(get(row, TABLE, "memory_mb")?, "nodes.memory_mb")?,
        updated_at: get(row, TABLE, "updated_at")?,
    })
}

fn membership_from_row(row: &PgRow) -> Result<NodePartition, DbError> {
    const TABLE: &str = "node_partitions";
    Ok(NodePartition {
        node: key(row, TABLE, "node", NodeName::new)?,
        partition: key(row, TABLE, "partition", PartitionName::new)?,
    })
}

fn node_resource_from_row(row: &PgRow) -> Result<NodeResource, DbError> {
    const TABLE: &str = "node_resources";
    Ok(NodeResource {
        node: key(row, TABLE, "node", NodeName::new)?,
        kind: key(row, TABLE, "kind", ResourceKind::new)?,
        total: from_db(get(row, TABLE, "total")?, "node_resources.total")?,
        available: from_db(get(row, TABLE, "available")?, "node_resources.available")?,
    })
}

fn job_from_row(row: &PgRow) -> Result<Job, DbError> {
    const TABLE: &str = "jobs";
    let status: String = get(row, TABLE, "status")?;
    let start_time: Option<DateTime<Utc>> = get(row, TABLE, "start_time")?;
    Ok(Job {
        job_id: key(row, TABLE, "job_id", JobId::new)?,
        user: get(row, TABLE, "user_name")?,
        partition: key(row, TABLE, "partition", PartitionName::new)?,
        status: JobStatus::from(status.as_str()),
        time_limit: get(row, TABLE, "time_limit")?,
        start_time,
        submit_time: get(row, TABLE, "submit_time")?,
        updated_at: get(row, TABLE, "updated_at")?,
    })
}

fn job_resource_from_row(row: &PgRow) -> Result<JobResource, DbError> {
    const TABLE: &str = "job_resources";
    Ok(JobResource {
        job: key(row, TABLE, "job", JobId::new)?,
        kind: key(row, TABLE, "kind", ResourceKind::new)?,
        requested: from_db(get(row, TABLE, "requested")?, "job_resources.requested")?,
        allocated: from_db(get(row, TABLE, "allocated")?, "job_resources.allocated")?,
    })
}

fn allocation_from_row(row: &PgRow) -> Result<Allocation, DbError> {
    const TABLE: &str = "job_allocations";
    Ok(Allocation {
        job: key(row, TABLE, "job", JobId::new)?,
        node: key(row, TABLE, "node", NodeName::new)?,
        kind: key(row, TABLE, "kind", ResourceKind::new)?,
        used: from_db(get(row, TABLE, "used")?, "job_allocations.used")?,
    })
}

fn get<'r, T>(row: &'r PgRow, table: &'static str, column: &str) -> Result<T, DbError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column).map_err(|e| DbError::Decode {
        table,
        reason: format!("{column}: {e}"),
    })
}

fn key<K, E, F>(row: &PgRow, table: &'static str, column: &str, make: F) -> Result<K, DbError>
where
    E: std::fmt::Display,
    F: FnOnce(String) -> Result<K, E>,
{
    let raw: String = get(row, table, column)?;
    make(raw).map_err(|e| DbError::Decode {
        table,
        reason: format!("{column}: {e}"),
    })
}

pub(crate) fn to_db(value: u64, column: &'static str) -> Result<i64, DbError> {
    i64::try_from(value).map_err(|_| DbError::OutOfRange {
        column,
        value: i128::from(value),
    })
}

pub(crate) fn from_db(value: i64, column: &'static str) -> Result<u64, DbError> {
    u64::try_from(value).map_err(|_| DbError::OutOfRange {
        column,
        value: i128::from(value),
    })
}
