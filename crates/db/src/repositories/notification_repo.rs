//! Repository for the `notifications` table.
//!
//! All writes go through upserts keyed on `(bill_id, notification_type)`
//! so that broker redelivery and concurrent batch workers can never
//! create duplicate rows for the same logical notification.

use billcast_core::types::{DbId, Timestamp};
use sqlx::PgPool;

use crate::models::notification::{NewNotification, NotificationRecord};
use crate::models::status::NotificationStatus;

/// Column list for `notifications` queries.
const COLUMNS: &str = "\
    id, user_id, bill_id, notification_type, status, recipient, content, \
    retry_count, scheduled_at, sent_at, error_message, created_at";

/// Provides persistence operations for notification records.
pub struct NotificationRepo;

impl NotificationRepo {
    /// Bulk upsert one batch of processing outcomes in a single statement.
    ///
    /// Inserts fresh rows and updates redelivered identities in place:
    /// `created_at` is preserved, and `retry_count` is incremented only
    /// when the incoming status is FAILED (a fresh row starts at 0, so a
    /// message failing on attempts 1..=4 progresses 0 → 1 → 2 → 3).
    ///
    /// Returns the number of rows written. An error here is an
    /// infrastructure failure: the caller must not commit the batch.
    pub async fn bulk_upsert(
        pool: &PgPool,
        records: &[NewNotification],
    ) -> Result<u64, sqlx::Error> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut user_ids: Vec<DbId> = Vec::with_capacity(records.len());
        let mut bill_ids: Vec<DbId> = Vec::with_capacity(records.len());
        let mut types: Vec<String> = Vec::with_capacity(records.len());
        let mut statuses: Vec<String> = Vec::with_capacity(records.len());
        let mut recipients: Vec<String> = Vec::with_capacity(records.len());
        let mut contents: Vec<String> = Vec::with_capacity(records.len());
        let mut scheduled: Vec<Timestamp> = Vec::with_capacity(records.len());
        let mut sent: Vec<Option<Timestamp>> = Vec::with_capacity(records.len());
        let mut errors: Vec<Option<String>> = Vec::with_capacity(records.len());

        for r in records {
            user_ids.push(r.user_id);
            bill_ids.push(r.bill_id);
            types.push(r.notification_type.clone());
            statuses.push(r.status.as_str().to_string());
            recipients.push(r.recipient.clone());
            contents.push(r.content.clone());
            scheduled.push(r.scheduled_at);
            sent.push(r.sent_at);
            errors.push(r.error_message.clone());
        }

        let result = sqlx::query(
            "INSERT INTO notifications \
                (user_id, bill_id, notification_type, status, recipient, content, \
                 scheduled_at, sent_at, error_message) \
             SELECT * FROM UNNEST( \
                $1::BIGINT[], $2::BIGINT[], $3::TEXT[], $4::TEXT[], $5::TEXT[], \
                $6::TEXT[], $7::TIMESTAMPTZ[], $8::TIMESTAMPTZ[], $9::TEXT[]) \
             ON CONFLICT (bill_id, notification_type) DO UPDATE SET \
                status = EXCLUDED.status, \
                recipient = EXCLUDED.recipient, \
                content = EXCLUDED.content, \
                scheduled_at = EXCLUDED.scheduled_at, \
                sent_at = EXCLUDED.sent_at, \
                error_message = EXCLUDED.error_message, \
                retry_count = CASE \
                    WHEN EXCLUDED.status = 'FAILED' \
                    THEN notifications.retry_count + 1 \
                    ELSE notifications.retry_count \
                END",
        )
        .bind(&user_ids)
        .bind(&bill_ids)
        .bind(&types)
        .bind(&statuses)
        .bind(&recipients)
        .bind(&contents)
        .bind(&scheduled)
        .bind(&sent)
        .bind(&errors)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Look up a record by its logical identity.
    pub async fn find_by_identity(
        pool: &PgPool,
        bill_id: DbId,
        notification_type: &str,
    ) -> Result<Option<NotificationRecord>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM notifications \
             WHERE bill_id = $1 AND notification_type = $2"
        );
        sqlx::query_as::<_, NotificationRecord>(&query)
            .bind(bill_id)
            .bind(notification_type)
            .fetch_optional(pool)
            .await
    }

    /// List FAILED records still inside the retry bound, oldest first.
    ///
    /// Records at the bound are terminal and never returned, which is
    /// what stops the periodic rescan from resubmitting them forever.
    pub async fn list_failed_for_retry(
        pool: &PgPool,
        max_retries: i32,
        limit: i64,
    ) -> Result<Vec<NotificationRecord>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM notifications \
             WHERE status = $1 AND retry_count < $2 \
             ORDER BY created_at ASC \
             LIMIT $3"
        );
        sqlx::query_as::<_, NotificationRecord>(&query)
            .bind(NotificationStatus::Failed.as_str())
            .bind(max_retries)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// Count FAILED records still inside the retry bound.
    pub async fn failed_retriable_count(
        pool: &PgPool,
        max_retries: i32,
    ) -> Result<i64, sqlx::Error> {
        let count: Option<i64> = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications WHERE status = $1 AND retry_count < $2",
        )
        .bind(NotificationStatus::Failed.as_str())
        .bind(max_retries)
        .fetch_one(pool)
        .await?;
        Ok(count.unwrap_or(0))
    }

    /// Flip a record to RETRY while the rescan re-dispatches it.
    pub async fn mark_retrying(pool: &PgPool, id: DbId) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE notifications SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(NotificationStatus::Retry.as_str())
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Record a successful re-dispatch.
    pub async fn mark_sent(pool: &PgPool, id: DbId) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE notifications \
             SET status = $2, sent_at = NOW(), error_message = NULL \
             WHERE id = $1",
        )
        .bind(id)
        .bind(NotificationStatus::Sent.as_str())
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Record a failed re-dispatch, incrementing the retry counter.
    pub async fn mark_failed(pool: &PgPool, id: DbId, error: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE notifications \
             SET status = $2, retry_count = retry_count + 1, error_message = $3 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(NotificationStatus::Failed.as_str())
        .bind(error)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Persist the terminal record for a dead-lettered message.
    ///
    /// Pins `retry_count` to the configured bound so the periodic rescan
    /// never picks the record up again.
    #[allow(clippy::too_many_arguments)]
    pub async fn record_dead_letter(
        pool: &PgPool,
        user_id: DbId,
        bill_id: DbId,
        notification_type: &str,
        recipient: &str,
        content: &str,
        max_retries: i32,
        annotation: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO notifications \
                (user_id, bill_id, notification_type, status, recipient, content, \
                 retry_count, scheduled_at, error_message) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), $8) \
             ON CONFLICT (bill_id, notification_type) DO UPDATE SET \
                status = EXCLUDED.status, \
                retry_count = EXCLUDED.retry_count, \
                error_message = EXCLUDED.error_message",
        )
        .bind(user_id)
        .bind(bill_id)
        .bind(notification_type)
        .bind(NotificationStatus::Failed.as_str())
        .bind(recipient)
        .bind(content)
        .bind(max_retries)
        .bind(annotation)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Count records per status, for the admin summary.
    pub async fn status_counts(pool: &PgPool) -> Result<Vec<(String, i64)>, sqlx::Error> {
        sqlx::query_as::<_, (String, i64)>(
            "SELECT status, COUNT(*) FROM notifications GROUP BY status ORDER BY status",
        )
        .fetch_all(pool)
        .await
    }
}
