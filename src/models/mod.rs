use uuid::Uuid;

pub mod batch;
pub mod site;
pub mod snapshot;

// Re-exports for convenience
pub use batch::*;
pub use site::*;
pub use snapshot::*;

// Helper function to generate IDs in the format expected by the database
pub fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()
}
