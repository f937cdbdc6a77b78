use super::actor::UserId;
use super::request::RequestId;
use super::task::TaskId;
use crate::error::{EntityRef, PipelineError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

pub type RatingId = u32;

const MIN_SCORE: Decimal = dec!(1);
const MAX_SCORE: Decimal = dec!(5);

fn score(name: &str, value: Decimal) -> Result<Decimal> {
    if value < MIN_SCORE || value > MAX_SCORE {
        return Err(PipelineError::ValidationError(format!(
            "{name} rating {value} is outside 1..=5"
        )));
    }
    Ok(value.round_dp(1))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackTone {
    Positive,
    Neutral,
    Negative,
}

impl FeedbackTone {
    pub fn for_rating(overall: Decimal) -> Self {
        if overall >= dec!(4) {
            Self::Positive
        } else if overall >= dec!(3) {
            Self::Neutral
        } else {
            Self::Negative
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    pub text: String,
    pub tone: FeedbackTone,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryScores {
    pub communication: Option<Decimal>,
    pub speed: Option<Decimal>,
    pub service_quality: Option<Decimal>,
}

/// What a customer submits after a task is done.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RatingDraft {
    pub overall: Decimal,
    pub anonymous: bool,
    pub categories: CategoryScores,
    pub feedback_text: Option<String>,
}

impl RatingDraft {
    pub fn overall(overall: Decimal) -> Self {
        Self {
            overall,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    id: RatingId,
    version: u32,
    task_id: TaskId,
    request_id: RequestId,
    rider_id: UserId,
    customer_id: UserId,
    overall: Decimal,
    categories: CategoryScores,
    feedback: Option<Feedback>,
    anonymous: bool,
    rated_at: DateTime<Utc>,
}

impl Rating {
    pub fn new(
        id: RatingId,
        task_id: TaskId,
        request_id: RequestId,
        rider_id: UserId,
        customer_id: UserId,
        draft: RatingDraft,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let overall = score("overall", draft.overall)?;
        let categories = CategoryScores {
            communication: draft
                .categories
                .communication
                .map(|v| score("communication", v))
                .transpose()?,
            speed: draft.categories.speed.map(|v| score("speed", v)).transpose()?,
            service_quality: draft
                .categories
                .service_quality
                .map(|v| score("service quality", v))
                .transpose()?,
        };
        let feedback = draft
            .feedback_text
            .filter(|t| !t.trim().is_empty())
            .map(|text| Feedback {
                text,
                tone: FeedbackTone::for_rating(overall),
            });

        Ok(Self {
            id,
            version: 0,
            task_id,
            request_id,
            rider_id,
            customer_id,
            overall,
            categories,
            feedback,
            anonymous: draft.anonymous,
            rated_at: now,
        })
    }

    pub fn id(&self) -> RatingId {
        self.id
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub(crate) fn bump_version(&mut self) {
        self.version += 1;
    }

    pub fn entity(&self) -> EntityRef {
        EntityRef::rating(self.id)
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn rider_id(&self) -> UserId {
        self.rider_id
    }

    /// `None` when the customer asked to stay anonymous.
    pub fn customer_id(&self) -> Option<UserId> {
        (!self.anonymous).then_some(self.customer_id)
    }

    pub fn overall(&self) -> Decimal {
        self.overall
    }

    pub fn categories(&self) -> CategoryScores {
        self.categories
    }

    pub fn feedback(&self) -> Option<&Feedback> {
        self.feedback.as_ref()
    }

    pub fn is_anonymous(&self) -> bool {
        self.anonymous
    }

    pub fn rated_at(&self) -> DateTime<Utc> {
        self.rated_at
    }
}

/// Whether a rider is holding work right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiderAvailability {
    Available,
    Busy,
}

/// Rolling performance figures for one rider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RiderSummary {
    pub rider_id: UserId,
    pub average_rating: Option<Decimal>,
    pub ratings_count: u32,
    pub tasks_completed: u32,
    /// Accepted or in-progress tasks bound to the rider.
    pub active_tasks: u32,
    pub availability: RiderAvailability,
}

impl RiderSummary {
    pub fn from_ratings(rider_id: UserId, ratings: &[Rating], tasks_completed: u32, active_tasks: u32) -> Self {
        let ratings_count = ratings.len() as u32;
        let average_rating = (ratings_count > 0).then(|| {
            let sum: Decimal = ratings.iter().map(Rating::overall).sum();
            (sum / Decimal::from(ratings_count)).round_dp(2)
        });
        let availability = if active_tasks > 0 {
            RiderAvailability::Busy
        } else {
            RiderAvailability::Available
        };
        Self {
            rider_id,
            average_rating,
            ratings_count,
            tasks_completed,
            active_tasks,
            availability,
        }
    }

    /// Riders with no ratings yet are given the benefit of the doubt.
    pub fn meets(&self, minimum: Decimal) -> bool {
        self.average_rating.is_none_or(|avg| avg >= minimum)
    }
}
