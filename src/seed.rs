use std::io;
use std::path::Path;

use tracing::info;

use crate::engine::{Engine, EngineError};
use crate::model::RoomInfo;

/// Read a JSON array of rooms, e.g.
/// `[{"number": 101, "price_per_night": "150.00", "capacity": 2}]`.
pub fn load_rooms(path: &Path) -> io::Result<Vec<RoomInfo>> {
    let raw = std::fs::read(path)?;
    serde_json::from_slice(&raw).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("bad seed file {}: {e}", path.display()),
        )
    })
}

/// Create every room that doesn't exist yet. Existing rooms are left alone.
/// Returns how many were created.
pub async fn seed_rooms(engine: &Engine, rooms: &[RoomInfo]) -> Result<usize, EngineError> {
    let mut created = 0;
    for room in rooms {
        match engine
            .create_room(room.number, room.price_per_night, room.capacity)
            .await
        {
            Ok(_) => created += 1,
            Err(EngineError::RoomExists(_)) => {}
            Err(e) => return Err(e),
        }
    }
    info!("seeded {created} of {} rooms", rooms.len());
    Ok(created)
}
