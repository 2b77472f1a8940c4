pub mod alert_ingestion;
