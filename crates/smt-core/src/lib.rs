pub mod coverage;
pub mod ff;
pub mod grammar;
pub mod hypothesis;
pub mod lm;
pub mod model;
pub mod rule;
pub mod search;
pub mod sentence;
pub mod settings;
pub mod vocab;
pub mod weights;
