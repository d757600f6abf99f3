pub mod consumer;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use mongodb::bson::doc;
use mongodb::options::{FindOneAndUpdateOptions, ReturnDocument};
use mongodb::{Collection, IndexModel};
use serde::{Deserialize, Serialize};

pub const JOBS_COLLECTION: &str = "blockchain_jobs";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSwapJob {
    pub group_id: String,
    pub bot_id: String,
    pub user_id: String,
    pub symbol: String,
    pub input_mint: String,
    pub output_mint: String,
    pub sol_amount: f64,
    pub priority_fee_amount: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmSwapJob {
    pub group_id: String,
    pub bot_id: String,
    pub user_id: String,
    pub side: TradeSide,
    pub token: String,
    pub symbol: String,
    pub amount_in: f64,
    pub amount_out: f64,
    pub txn_id: String,
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmBurnJob {
    pub group_id: String,
    pub user_id: String,
    pub amount: f64,
    pub symbol: String,
    pub tx_id: String,
    pub message_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmTransferJob {
    pub group_id: String,
    pub user_id: String,
    pub amount: f64,
    pub to: String,
    pub tx_id: String,
    pub message_id: String,
}

/// The four job contracts this pipeline consumes. The tag is the wire-level
/// job name the producers enqueue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload")]
pub enum Job {
    #[serde(rename = "swap.create")]
    CreateSwap(CreateSwapJob),
    #[serde(rename = "swap.confirm")]
    ConfirmSwap(ConfirmSwapJob),
    #[serde(rename = "burn.confirm")]
    ConfirmBurn(ConfirmBurnJob),
    #[serde(rename = "transfer.confirm")]
    ConfirmTransfer(ConfirmTransferJob),
}

impl Job {
    pub fn kind(&self) -> &'static str {
        match self {
            Job::CreateSwap(_) => "swap.create",
            Job::ConfirmSwap(_) => "swap.confirm",
            Job::ConfirmBurn(_) => "burn.confirm",
            Job::ConfirmTransfer(_) => "transfer.confirm",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Active,
    Completed,
    Failed,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobDocument {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    #[serde(flatten)]
    pub job: Job,
    pub status: JobStatus,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
}

/// Producer-side handle. Enqueueing is fire-and-forget from the caller's
/// perspective; processing happens in the consumer pool.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: Job) -> Result<()>;
}

/// Durable queue on the shared MongoDB broker. Claims are atomic
/// find-one-and-update transitions, which gives at-least-once delivery with
/// the worker pool bounding concurrency.
pub struct MongoJobQueue {
    jobs: Collection<JobDocument>,
    max_attempts: i32,
}

impl MongoJobQueue {
    pub fn new(db: &mongodb::Database, max_attempts: u32) -> Self {
        Self {
            jobs: db.collection::<JobDocument>(JOBS_COLLECTION),
            max_attempts: max_attempts as i32,
        }
    }

    pub async fn setup_indexes(&self) -> Result<()> {
        let claim_index = IndexModel::builder()
            .keys(doc! { "status": 1, "_id": 1 })
            .build();

        let created_index = IndexModel::builder()
            .keys(doc! { "created_at": 1 })
            .build();

        self.jobs.create_index(claim_index, None).await?;
        self.jobs.create_index(created_index, None).await?;

        Ok(())
    }

    /// Atomically claim the oldest queued job for this worker.
    pub async fn claim(&self) -> Result<Option<JobDocument>> {
        let options = FindOneAndUpdateOptions::builder()
            .sort(doc! { "_id": 1 })
            .return_document(ReturnDocument::After)
            .build();

        let claimed = self
            .jobs
            .find_one_and_update(
                doc! { "status": "queued" },
                doc! { "$set": { "status": "active" }, "$inc": { "attempts": 1 } },
                Some(options),
            )
            .await?;

        Ok(claimed)
    }

    pub async fn complete(&self, id: &ObjectId) -> Result<()> {
        self.jobs
            .update_one(
                doc! { "_id": id },
                doc! { "$set": { "status": "completed" } },
                None,
            )
            .await?;
        Ok(())
    }

    /// Requeue for the broker's retry policy until the attempt budget is
    /// spent, then park the job as failed.
    pub async fn fail(&self, id: &ObjectId, attempts: i32) -> Result<()> {
        let next_status = if attempts < self.max_attempts {
            "queued"
        } else {
            "failed"
        };

        self.jobs
            .update_one(
                doc! { "_id": id },
                doc! { "$set": { "status": next_status } },
                None,
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl JobQueue for MongoJobQueue {
    async fn enqueue(&self, job: Job) -> Result<()> {
        tracing::debug!(kind = job.kind(), "enqueueing job");
        self.jobs
            .insert_one(
                JobDocument {
                    id: None,
                    job,
                    status: JobStatus::Queued,
                    attempts: 0,
                    created_at: Utc::now(),
                },
                None,
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_kinds_match_the_wire_contract() {
        let job = Job::CreateSwap(CreateSwapJob {
            group_id: "-100123".to_string(),
            bot_id: "bot".to_string(),
            user_id: "42".to_string(),
            symbol: "TKN".to_string(),
            input_mint: "So11111111111111111111111111111111111111112".to_string(),
            output_mint: "mint".to_string(),
            sol_amount: 0.5,
            priority_fee_amount: 0.005,
        });

        assert_eq!(job.kind(), "swap.create");

        let wire = serde_json::to_value(&job).unwrap();
        assert_eq!(wire["kind"], "swap.create");
        assert_eq!(wire["payload"]["solAmount"], 0.5);
        assert_eq!(wire["payload"]["inputMint"], "So11111111111111111111111111111111111111112");
    }

    #[test]
    fn confirm_payload_round_trips_with_camel_case_keys() {
        let raw = serde_json::json!({
            "kind": "swap.confirm",
            "payload": {
                "groupId": "-100123",
                "botId": "bot",
                "userId": "42",
                "side": "buy",
                "token": "mint",
                "symbol": "TKN",
                "amountIn": 0.5,
                "amountOut": 12345.6789,
                "txnId": "sig",
                "messageId": "77"
            }
        });

        let job: Job = serde_json::from_value(raw).unwrap();
        match job {
            Job::ConfirmSwap(data) => {
                assert_eq!(data.side, TradeSide::Buy);
                assert_eq!(data.message_id, "77");
                assert!(data.username.is_none());
            }
            other => panic!("unexpected job: {other:?}"),
        }
    }
}
