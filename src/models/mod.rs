pub mod company;
pub mod lead;
pub mod plan;
pub mod subscriber;
