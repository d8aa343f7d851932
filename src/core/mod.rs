pub mod consolidate;
pub mod criteria;
pub mod graph;
pub mod item;
pub mod matcher;
pub mod predicate;
pub mod similarity;
