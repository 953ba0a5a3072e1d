use std::time::Duration;

use rusqlite::Connection;

pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

pub fn configure_connection(conn: &Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;\n\
         PRAGMA synchronous = NORMAL;\n\
         PRAGMA foreign_keys = ON;\n\
         PRAGMA temp_store = MEMORY;\n",
    )?;
    conn.busy_timeout(busy_timeout)
}
