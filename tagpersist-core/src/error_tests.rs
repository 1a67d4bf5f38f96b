/*!
Tests for error handling and error types.
*/

#[cfg(test)]
mod tests {
    use crate::error::PersistError;
    use std::io;

    #[test]
    fn test_persist_error_display() {
        let error = PersistError::ArgumentMissing("value");
        assert_eq!(error.to_string(), "Missing required argument: value");

        let error = PersistError::invalid_destination("report.txt");
        assert_eq!(
            error.to_string(),
            "Invalid destination report.txt: file path must end with .bin"
        );

        let error = PersistError::config("gzip level 12 is out of range");
        assert_eq!(
            error.to_string(),
            "Configuration error: gzip level 12 is out of range"
        );
    }

    #[test]
    fn test_persist_error_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "File not found");
        let persist_error = PersistError::from(io_error);

        match persist_error {
            PersistError::Io(_) => {} // Expected
            _ => panic!("Expected Io error variant"),
        }
    }

    #[test]
    fn test_persist_error_from_encode_error() {
        use prost::Message;

        // A 2-byte slice cannot hold any non-empty message.
        let value = fixtures::Note {
            body: "does not fit".to_string(),
        };
        let mut tiny = [0u8; 2];
        let mut buf: &mut [u8] = &mut tiny;
        let encode_error = value.encode(&mut buf).unwrap_err();

        match PersistError::from(encode_error) {
            PersistError::Encoding(_) => {}
            _ => panic!("Expected Encoding error variant"),
        }
    }

    #[test]
    fn test_foreign_buffer_error_mentions_lease() {
        let error = PersistError::ForeignBuffer { lease: 42 };
        assert!(error.to_string().contains("42"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<PersistError>();
        assert_sync::<PersistError>();
    }

    #[test]
    fn test_error_chain() {
        let root_cause = io::Error::new(io::ErrorKind::PermissionDenied, "Access denied");
        let persist_error = PersistError::from(root_cause);

        match persist_error {
            PersistError::Io(ref io_err) => {
                assert_eq!(io_err.kind(), io::ErrorKind::PermissionDenied);
            }
            _ => panic!("Expected Io error"),
        }
    }

    #[test]
    fn test_error_result_type() {
        fn returns_error() -> crate::Result<()> {
            Err(PersistError::ArgumentMissing("path"))
        }

        assert!(matches!(
            returns_error(),
            Err(PersistError::ArgumentMissing("path"))
        ));
    }

    mod fixtures {
        #[derive(Clone, PartialEq, prost::Message)]
        pub struct Note {
            #[prost(string, tag = "1")]
            pub body: String,
        }
    }
}
