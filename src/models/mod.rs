pub mod payload;
pub mod recommendation;

pub use recommendation::{
    InvalidRelation, NewRecommendation, Recommendation, RecommendationFilter,
    RecommendationPatch, Relation, MAX_DISLIKE,
};
