pub mod box_record;
pub mod score;
pub mod visit;
