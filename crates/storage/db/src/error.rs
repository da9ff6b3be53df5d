/// Database error type.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DatabaseError {
    /// Failed to initiate a transaction.
    #[error("failed to initialize a transaction: {0}")]
    InitTx(String),
    /// Failed to read a value from a table.
    #[error("failed to read a value from table {table}: {reason}")]
    Read {
        /// Table name.
        table: &'static str,
        /// Failure description.
        reason: String,
    },
    /// Failed to write a value into a table.
    #[error("failed to write a value into table {0}")]
    Write(&'static str),
    /// Failed to commit transaction changes into the database.
    #[error("failed to commit transaction changes: {0}")]
    Commit(String),
    /// Failed to decode a key from a table.
    #[error("failed to decode a key from table {0}")]
    DecodeKey(&'static str),
    /// Failed to decode a value from a table.
    #[error("failed to decode a value from table {table}: {reason}")]
    DecodeValue {
        /// Table name.
        table: &'static str,
        /// Codec error.
        reason: String,
    },
}
