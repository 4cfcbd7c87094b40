use crate::Level;

/// Failure to change a single mapping.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MapError {
    /// No frame was available for a missing intermediate table.
    #[error("out of memory allocating a {0} table")]
    OutOfMemory(Level),
    /// The 4 KiB slot is already present, or covered by a large page.
    #[error("virtual page is already mapped")]
    AlreadyMapped,
    /// Nothing is mapped at the requested address.
    #[error("virtual page is not mapped")]
    NotMapped,
}
