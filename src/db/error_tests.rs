//! Unit tests for tag index error types

#[cfg(test)]
mod tests {
    use crate::db::error::DbError;
    use crate::source::SourceError;
    use std::error::Error;

    #[test]
    fn test_busy_error() {
        let error = DbError::Busy { attempts: 7 };
        assert_eq!(error.to_string(), "Database is busy after 7 attempts");
    }

    #[test]
    fn test_offline_error() {
        let error = DbError::Offline;
        assert_eq!(error.to_string(), "Cache rebuild required but running offline");
        assert!(error.source().is_none());
    }

    #[test]
    fn test_source_error_conversion() {
        let error: DbError = SourceError::Transport("timeout".into()).into();
        assert!(error.to_string().contains("Tag source error"));
        assert!(error.to_string().contains("timeout"));
        assert!(error.source().is_some());
    }

    #[test]
    fn test_sqlite_error_conversion() {
        let error: DbError = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(error, DbError::SqliteError(_)));
    }

    #[test]
    fn test_invalid_input_error() {
        let error = DbError::InvalidInput("max_terms too small".to_string());
        match error {
            DbError::InvalidInput(message) => assert_eq!(message, "max_terms too small"),
            _ => panic!("Expected InvalidInput variant"),
        }
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<DbError>();
    }
}
