// Helper for generating UUIDv7 (timestamp-sortable UUIDs).
//
// Principal ids are generated app-side so the in-memory and PostgreSQL
// credential stores hand out ids of the same shape.

use uuid::Uuid;

/// Generate a new UUIDv7 (timestamp-sortable).
pub fn uuidv7() -> Uuid {
    Uuid::now_v7()
}
