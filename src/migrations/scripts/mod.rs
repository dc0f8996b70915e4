pub mod m001_file_reverse_backfill;
pub mod m002_date_query_indexes;
