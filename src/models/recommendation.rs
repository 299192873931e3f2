use serde::Serialize;
use std::fmt::Display;

/// How the target product relates to the origin product
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(into = "i64")]
pub enum Relation {
    CrossSell = 1,
    UpSell = 2,
    Accessory = 3,
}

/// Raised when an integer code does not name a [`Relation`]
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("relation must be 1 (cross-sell), 2 (up-sell) or 3 (accessory), got {0}")]
pub struct InvalidRelation(pub i64);

impl Relation {
    /// Integer code stored in the database and exposed over the API
    pub fn code(self) -> i64 {
        self as i64
    }
}

impl From<Relation> for i64 {
    fn from(relation: Relation) -> Self {
        relation.code()
    }
}

impl TryFrom<i64> for Relation {
    type Error = InvalidRelation;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(Relation::CrossSell),
            2 => Ok(Relation::UpSell),
            3 => Ok(Relation::Accessory),
            other => Err(InvalidRelation(other)),
        }
    }
}

impl Display for Relation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Relation::CrossSell => write!(f, "cross-sell"),
            Relation::UpSell => write!(f, "up-sell"),
            Relation::Accessory => write!(f, "accessory"),
        }
    }
}

/// Largest dislike count a row may hold; keeps `dislike + 1` inside SQLite's integer range
pub const MAX_DISLIKE: i64 = i32::MAX as i64;

/// A stored recommendation linking an origin product to a target product
#[derive(Debug, Clone, Serialize, PartialEq, Eq, sqlx::FromRow)]
pub struct Recommendation {
    pub id: i64,
    pub product_origin: i64,
    pub product_target: i64,
    #[sqlx(try_from = "i64")]
    pub relation: Relation,
    pub dislike: i64,
    /// Soft-delete flag, exchanged as `0`/`1`
    #[serde(serialize_with = "serialize_flag")]
    pub is_deleted: bool,
}

/// A validated recommendation that has not been stored yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecommendation {
    pub product_origin: i64,
    pub product_target: i64,
    pub relation: Relation,
    pub dislike: i64,
}

impl NewRecommendation {
    pub fn new(product_origin: i64, product_target: i64, relation: Relation) -> Self {
        Self {
            product_origin,
            product_target,
            relation,
            dislike: 0,
        }
    }
}

/// Field replacements for an existing recommendation.
///
/// `None` leaves the stored value untouched. Applying a patch always makes the
/// record live again.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecommendationPatch {
    pub product_origin: Option<i64>,
    pub product_target: Option<i64>,
    pub relation: Option<Relation>,
    pub dislike: Option<i64>,
}

/// Attribute filter for recommendation lookups; unset fields match everything
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecommendationFilter {
    pub product_origin: Option<i64>,
    pub product_target: Option<i64>,
    pub relation: Option<Relation>,
}

fn serialize_flag<S: serde::Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u8(u8::from(*value))
}
