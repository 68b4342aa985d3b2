pub mod duplicates;
pub mod groups;
pub mod health;
pub mod scans;
