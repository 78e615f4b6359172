pub mod distill;
pub mod gather;
pub mod lifecycle;
pub mod recall;
pub mod records;
pub mod salience;
pub mod stats;
pub mod types;
pub mod versions;
