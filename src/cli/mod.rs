pub mod db_counts;
pub mod schema_audit;
