//! `PostgreSQL` implementation of the `RelayStore` trait.
//!
//! Every status write is a single conditional `UPDATE ... WHERE status = $n`
//! so two actors racing on one record cannot both win. Claims lock the
//! candidate row with `FOR UPDATE SKIP LOCKED` so concurrent agents on one
//! pairing never claim the same record.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tablelink_core::error::RelayError;
use tablelink_core::store::{
    ABANDONED_MESSAGE, ExpiryCounts, Pairing, RecordStatus, RecordTransition, RelayRecord,
    RelayStore, TurnEvent, TurnEventStatus,
};
use tracing::debug;
use uuid::Uuid;

use crate::error::map_sqlx_error;
use crate::schema::{PAIRING_COLUMNS, RECORD_COLUMNS, TERMINAL_STATUSES, TURN_EVENT_COLUMNS};

#[derive(Debug, sqlx::FromRow)]
struct PairingRow {
    id: Uuid,
    code: String,
    issuer_ref: Option<String>,
    agent_ref: String,
    status: String,
    created_at: DateTime<Utc>,
    connected_at: Option<DateTime<Utc>>,
    expires_at: DateTime<Utc>,
}

impl TryFrom<PairingRow> for Pairing {
    type Error = RelayError;

    fn try_from(row: PairingRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            code: row.code,
            issuer_ref: row.issuer_ref,
            agent_ref: row.agent_ref,
            status: row.status.parse()?,
            created_at: row.created_at,
            connected_at: row.connected_at,
            expires_at: row.expires_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RecordRow {
    id: Uuid,
    pairing_id: Uuid,
    kind: String,
    issuer_ref: String,
    payload: serde_json::Value,
    status: String,
    result: Option<serde_json::Value>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    expires_at: DateTime<Utc>,
}

impl TryFrom<RecordRow> for RelayRecord {
    type Error = RelayError;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            pairing_id: row.pairing_id,
            kind: row.kind.parse()?,
            issuer_ref: row.issuer_ref,
            payload: row.payload,
            status: row.status.parse()?,
            result: row.result,
            error: row.error,
            created_at: row.created_at,
            processed_at: row.processed_at,
            expires_at: row.expires_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TurnEventRow {
    id: Uuid,
    pairing_id: Uuid,
    event_type: String,
    combatant_name: Option<String>,
    round: i32,
    action_flags: serde_json::Value,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<TurnEventRow> for TurnEvent {
    type Error = RelayError;

    fn try_from(row: TurnEventRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            pairing_id: row.pairing_id,
            event_type: row.event_type.parse()?,
            combatant_name: row.combatant_name,
            round: row.round,
            action_flags: row.action_flags,
            status: row.status.parse()?,
            created_at: row.created_at,
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>, RelayError>
where
    T: TryFrom<R, Error = RelayError>,
{
    rows.into_iter().map(T::try_from).collect()
}

/// PostgreSQL-backed relay store.
#[derive(Debug, Clone)]
pub struct PgRelayStore {
    pool: PgPool,
}

impl PgRelayStore {
    /// Creates a new `PgRelayStore`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_record(&self, id: Uuid) -> Result<Option<RelayRecord>, RelayError> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM relay_records WHERE id = $1");
        sqlx::query_as::<_, RecordRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .map(RelayRecord::try_from)
            .transpose()
    }
}

#[async_trait]
impl RelayStore for PgRelayStore {
    async fn insert_pairing(&self, pairing: &Pairing) -> Result<(), RelayError> {
        sqlx::query(
            "INSERT INTO pairings \
             (id, code, issuer_ref, agent_ref, status, created_at, connected_at, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(pairing.id)
        .bind(&pairing.code)
        .bind(&pairing.issuer_ref)
        .bind(&pairing.agent_ref)
        .bind(pairing.status.as_str())
        .bind(pairing.created_at)
        .bind(pairing.connected_at)
        .bind(pairing.expires_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn get_pairing(&self, id: Uuid) -> Result<Option<Pairing>, RelayError> {
        let sql = format!("SELECT {PAIRING_COLUMNS} FROM pairings WHERE id = $1");
        sqlx::query_as::<_, PairingRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .map(Pairing::try_from)
            .transpose()
    }

    async fn find_pairing_by_code(&self, code: &str) -> Result<Option<Pairing>, RelayError> {
        let sql = format!("SELECT {PAIRING_COLUMNS} FROM pairings WHERE code = $1");
        sqlx::query_as::<_, PairingRow>(&sql)
            .bind(code)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .map(Pairing::try_from)
            .transpose()
    }

    async fn connect_pairing(
        &self,
        id: Uuid,
        issuer_ref: &str,
        now: DateTime<Utc>,
    ) -> Result<Pairing, RelayError> {
        let sql = format!(
            "UPDATE pairings SET status = 'connected', issuer_ref = $2, connected_at = $3 \
             WHERE id = $1 AND status = 'pending' AND expires_at > $3 \
             RETURNING {PAIRING_COLUMNS}"
        );
        let updated = sqlx::query_as::<_, PairingRow>(&sql)
            .bind(id)
            .bind(issuer_ref)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        if let Some(row) = updated {
            return Pairing::try_from(row);
        }
        match self.get_pairing(id).await? {
            Some(pairing) => Err(RelayError::Validation(format!(
                "pairing code {} is no longer claimable",
                pairing.code
            ))),
            None => Err(RelayError::NotFound(id)),
        }
    }

    async fn reissue_pairing(
        &self,
        id: Uuid,
        code: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Pairing, RelayError> {
        let sql = format!(
            "UPDATE pairings SET code = $2, status = 'pending', issuer_ref = NULL, \
             connected_at = NULL, expires_at = $3 WHERE id = $1 \
             RETURNING {PAIRING_COLUMNS}"
        );
        sqlx::query_as::<_, PairingRow>(&sql)
            .bind(id)
            .bind(code)
            .bind(expires_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .ok_or(RelayError::NotFound(id))
            .and_then(Pairing::try_from)
    }

    async fn insert_record(&self, record: &RelayRecord) -> Result<(), RelayError> {
        sqlx::query(
            "INSERT INTO relay_records \
             (id, pairing_id, kind, issuer_ref, payload, status, result, error, \
              created_at, processed_at, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(record.id)
        .bind(record.pairing_id)
        .bind(record.kind.as_str())
        .bind(&record.issuer_ref)
        .bind(&record.payload)
        .bind(record.status.as_str())
        .bind(&record.result)
        .bind(&record.error)
        .bind(record.created_at)
        .bind(record.processed_at)
        .bind(record.expires_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn get_record(&self, id: Uuid) -> Result<Option<RelayRecord>, RelayError> {
        self.fetch_record(id).await
    }

    async fn list_records(
        &self,
        pairing_id: Uuid,
        status: Option<RecordStatus>,
    ) -> Result<Vec<RelayRecord>, RelayError> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM relay_records \
             WHERE pairing_id = $1 AND ($2::text IS NULL OR status = $2) \
             ORDER BY seq"
        );
        let rows = sqlx::query_as::<_, RecordRow>(&sql)
            .bind(pairing_id)
            .bind(status.map(RecordStatus::as_str))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        convert_all(rows)
    }

    async fn claim_next(
        &self,
        pairing_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<RelayRecord>, RelayError> {
        let sql = format!(
            "UPDATE relay_records SET status = 'processing', processed_at = $2 \
             WHERE status = 'pending' AND id = ( \
                 SELECT id FROM relay_records \
                 WHERE pairing_id = $1 AND status = 'pending' AND expires_at > $2 \
                 ORDER BY seq \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {RECORD_COLUMNS}"
        );
        let claimed = sqlx::query_as::<_, RecordRow>(&sql)
            .bind(pairing_id)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .map(RelayRecord::try_from)
            .transpose()?;
        if claimed.is_none() {
            debug!(%pairing_id, "no pending record to claim");
        }
        Ok(claimed)
    }

    async fn transition_record(
        &self,
        id: Uuid,
        transition: RecordTransition,
        now: DateTime<Utc>,
    ) -> Result<RelayRecord, RelayError> {
        let source = transition.source();
        let target = transition.target();
        let (result, error, processed_at) = match transition {
            RecordTransition::Claim => (None, None, Some(now)),
            RecordTransition::Deliver(result) => (Some(result), None, Some(now)),
            RecordTransition::Fail(message) => (None, Some(message), Some(now)),
            RecordTransition::Timeout => (None, None, None),
        };
        let sql = format!(
            "UPDATE relay_records SET status = $3, \
             result = COALESCE($4, result), \
             error = COALESCE($5, error), \
             processed_at = COALESCE($6, processed_at) \
             WHERE id = $1 AND status = $2 \
             RETURNING {RECORD_COLUMNS}"
        );
        let updated = sqlx::query_as::<_, RecordRow>(&sql)
            .bind(id)
            .bind(source.as_str())
            .bind(target.as_str())
            .bind(result)
            .bind(error)
            .bind(processed_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        if let Some(row) = updated {
            return RelayRecord::try_from(row);
        }
        match self.fetch_record(id).await? {
            Some(record) => Err(RelayError::TransitionRejected {
                id,
                from: record.status,
                to: target,
            }),
            None => Err(RelayError::NotFound(id)),
        }
    }

    async fn insert_turn_event(&self, event: &TurnEvent) -> Result<(), RelayError> {
        sqlx::query(
            "INSERT INTO turn_events \
             (id, pairing_id, event_type, combatant_name, round, action_flags, status, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(event.id)
        .bind(event.pairing_id)
        .bind(event.event_type.as_str())
        .bind(&event.combatant_name)
        .bind(event.round)
        .bind(&event.action_flags)
        .bind(event.status.as_str())
        .bind(event.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn list_turn_events(
        &self,
        pairing_id: Uuid,
        status: Option<TurnEventStatus>,
    ) -> Result<Vec<TurnEvent>, RelayError> {
        let sql = format!(
            "SELECT {TURN_EVENT_COLUMNS} FROM turn_events \
             WHERE pairing_id = $1 AND ($2::text IS NULL OR status = $2) \
             ORDER BY seq"
        );
        let rows = sqlx::query_as::<_, TurnEventRow>(&sql)
            .bind(pairing_id)
            .bind(status.map(TurnEventStatus::as_str))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        convert_all(rows)
    }

    async fn mark_turn_event_announced(&self, id: Uuid) -> Result<TurnEvent, RelayError> {
        let sql = format!(
            "UPDATE turn_events SET status = 'announced' WHERE id = $1 \
             RETURNING {TURN_EVENT_COLUMNS}"
        );
        sqlx::query_as::<_, TurnEventRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .ok_or(RelayError::NotFound(id))
            .and_then(TurnEvent::try_from)
    }

    async fn expire_records(&self, now: DateTime<Utc>) -> Result<ExpiryCounts, RelayError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let timed_out = sqlx::query(
            "UPDATE relay_records SET status = 'timeout' \
             WHERE status = 'pending' AND expires_at <= $1",
        )
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?
        .rows_affected();
        let abandoned = sqlx::query(
            "UPDATE relay_records SET status = 'failed', error = $2, processed_at = $1 \
             WHERE status = 'processing' AND expires_at <= $1",
        )
        .bind(now)
        .bind(ABANDONED_MESSAGE)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?
        .rows_affected();
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(ExpiryCounts {
            timed_out,
            abandoned,
        })
    }

    async fn expire_pairings(&self, now: DateTime<Utc>) -> Result<u64, RelayError> {
        let result = sqlx::query(
            "UPDATE pairings SET status = 'expired' \
             WHERE status = 'pending' AND expires_at <= $1",
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }

    async fn purge_records(&self, cutoff: DateTime<Utc>) -> Result<u64, RelayError> {
        let result = sqlx::query(
            "DELETE FROM relay_records WHERE status = ANY($1) AND created_at < $2",
        )
        .bind(TERMINAL_STATUSES)
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }
}
