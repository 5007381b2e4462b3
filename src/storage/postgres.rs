use std::sync::Arc;

use log::{info, warn};
use postgres::{Client, NoTls, Statement};

use super::{decode_record, encode_record, BlockDatabase, LoadOutcome, StorageError};
use crate::config::PostgresConfig;
use crate::world::block::MapBlock;
use crate::world::{BlockPos, World};

struct PgConnection {
    client: Client,
    read: Statement,
    write: Statement,
    list: Statement,
}

enum DbState {
    Closed,
    Ready(PgConnection),
    Failed,
}

/// Relational SQL backend. Each world gets its own `<world>_blocks`
/// table, addressed by smallint coordinate columns.
pub struct PostgresDatabase {
    map: Arc<World>,
    params: PostgresConfig,
    table: String,
    state: DbState,
}

impl PostgresDatabase {
    pub fn new(map: Arc<World>, params: PostgresConfig, world_name: &str) -> PostgresDatabase {
        PostgresDatabase {
            map,
            params,
            table: format!("{}_blocks", world_name),
            state: DbState::Closed,
        }
    }

    fn open(params: &PostgresConfig, table: &str) -> Result<PgConnection, StorageError> {
        let mut client = postgres::Config::new()
            .host(&params.host)
            .user(&params.user)
            .password(&params.password)
            .dbname(&params.database)
            .connect(NoTls)
            .map_err(|e| StorageError::Init(format!("cannot connect to postgres: {}", e)))?;

        client
            .batch_execute(&format!(
                "CREATE TABLE IF NOT EXISTS \"{}\" (
                    x smallint NOT NULL,
                    y smallint NOT NULL,
                    z smallint NOT NULL,
                    data bytea NOT NULL,
                    PRIMARY KEY (x, y, z)
                )",
                table
            ))
            .map_err(|e| StorageError::Init(format!("cannot create block table: {}", e)))?;

        let read = client
            .prepare(&format!(
                "SELECT data FROM \"{}\" WHERE x = $1 AND y = $2 AND z = $3 LIMIT 1",
                table
            ))
            .map_err(|e| StorageError::Init(format!("cannot prepare read statement: {}", e)))?;
        let write = client
            .prepare(&format!(
                "INSERT INTO \"{}\" (x, y, z, data) VALUES ($1, $2, $3, $4)
                 ON CONFLICT (x, y, z) DO UPDATE SET data = excluded.data",
                table
            ))
            .map_err(|e| StorageError::Init(format!("cannot prepare write statement: {}", e)))?;
        let list = client
            .prepare(&format!("SELECT x, y, z FROM \"{}\"", table))
            .map_err(|e| StorageError::Init(format!("cannot prepare list statement: {}", e)))?;

        info!("Opened postgres block database, table {}", table);
        Ok(PgConnection {
            client,
            read,
            write,
            list,
        })
    }

    fn database(&mut self) -> Result<&mut PgConnection, StorageError> {
        if let DbState::Closed = self.state {
            match Self::open(&self.params, &self.table) {
                Ok(conn) => self.state = DbState::Ready(conn),
                Err(e) => {
                    self.state = DbState::Failed;
                    return Err(e);
                }
            }
        }

        match &mut self.state {
            DbState::Ready(conn) => Ok(conn),
            _ => Err(StorageError::NotReady),
        }
    }
}

impl BlockDatabase for PostgresDatabase {
    fn initialized(&self) -> bool {
        matches!(self.state, DbState::Ready(_))
    }

    fn begin_save(&mut self) -> Result<(), StorageError> {
        let db = self.database()?;
        if let Err(e) = db.client.batch_execute("BEGIN;") {
            warn!("Failed to begin transaction, saving may be slow: {}", e);
        }
        Ok(())
    }

    fn end_save(&mut self) -> Result<(), StorageError> {
        let db = self.database()?;
        if let Err(e) = db.client.batch_execute("COMMIT;") {
            warn!(
                "Failed to commit transaction, the map may not have been saved: {}",
                e
            );
        }
        Ok(())
    }

    fn save_block(&mut self, block: &MapBlock) -> Result<(), StorageError> {
        if block.is_dummy() || !block.is_modified() {
            return Ok(());
        }

        let pos = block.pos();
        let record = encode_record(block)?;

        let db = self.database()?;
        db.client
            .execute(&db.write, &[&pos.x, &pos.y, &pos.z, &record])?;
        Ok(())
    }

    fn load_block(&mut self, pos: BlockPos) -> Result<LoadOutcome, StorageError> {
        let record: Option<Vec<u8>> = {
            let db = self.database()?;
            db.client
                .query_opt(&db.read, &[&pos.x, &pos.y, &pos.z])?
                .map(|row| row.get(0))
        };

        match record {
            Some(record) => decode_record(&self.map, pos, &record),
            None => Ok(LoadOutcome::NotFound),
        }
    }

    fn list_all_blocks(&mut self) -> Result<Vec<BlockPos>, StorageError> {
        let db = self.database()?;
        let rows = db.client.query(&db.list, &[])?;
        Ok(rows
            .iter()
            .map(|row| BlockPos::new(row.get(0), row.get(1), row.get(2)))
            .collect())
    }
}
