//! Storage put request and acknowledgment
//!
//! A coordinator sends one [`StoragePut`] per storage node a logical write
//! touches. The node may open several local transaction branches to apply it
//! (one per partition) and reports all of their names in the
//! [`StoragePutAck`], so the coordinator can later commit or roll back each
//! branch without a separate registration round trip.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::codec::{NetInput, NetOutput};
use super::error::ProtocolResult;
use super::{Packet, PacketDecoder, PacketType, NAME_DELIMITER, PROTOCOL_VERSION_2};
use crate::executor::{Datum, RowKey};
use crate::storage::PartitionKey;

/// Column assignments for one row
#[derive(Debug, Clone, PartialEq)]
pub struct PutEntry {
    pub row_key: RowKey,
    pub assignments: Vec<(usize, Datum)>,
}

/// Column writes to rows of one table on one storage node
#[derive(Debug, Clone, PartialEq)]
pub struct StoragePut {
    /// Name of the coordinator's transaction, for correlation
    pub coordinator_txn: String,
    pub table: String,
    pub entries: Vec<PutEntry>,
    /// Restrict the put to these partitions (protocol version 2 and later)
    pub partitions: Option<Vec<PartitionKey>>,
}

impl Packet for StoragePut {
    fn packet_type(&self) -> PacketType {
        PacketType::StoragePut
    }

    fn encode(&self, out: &mut NetOutput, version: u16) -> ProtocolResult<()> {
        out.write_string(&self.coordinator_txn)
            .write_string(&self.table)
            .write_var_int(self.entries.len() as u64);
        for entry in &self.entries {
            out.write_bytes(entry.row_key.as_bytes())
                .write_var_int(entry.assignments.len() as u64);
            for (column, value) in &entry.assignments {
                out.write_var_int(*column as u64).write_datum(value);
            }
        }
        if version >= PROTOCOL_VERSION_2 {
            match &self.partitions {
                Some(partitions) => {
                    out.write_bool(true)
                        .write_var_int(partitions.len() as u64);
                    for p in partitions {
                        out.write_string(p);
                    }
                }
                None => {
                    out.write_bool(false);
                }
            }
        }
        Ok(())
    }
}

impl PacketDecoder for StoragePut {
    const PACKET_TYPE: PacketType = PacketType::StoragePut;

    fn decode(input: &mut NetInput, version: u16) -> ProtocolResult<Self> {
        let coordinator_txn = input.read_string()?;
        let table = input.read_string()?;

        let entry_count = input.read_len()?;
        let mut entries = Vec::with_capacity(entry_count);
        for _ in 0..entry_count {
            let row_key = RowKey(input.read_bytes()?.to_vec());
            let assignment_count = input.read_len()?;
            let mut assignments = Vec::with_capacity(assignment_count);
            for _ in 0..assignment_count {
                let column = input.read_var_int()? as usize;
                assignments.push((column, input.read_datum()?));
            }
            entries.push(PutEntry {
                row_key,
                assignments,
            });
        }

        let partitions = if version >= PROTOCOL_VERSION_2 && input.read_bool()? {
            let count = input.read_len()?;
            let mut partitions = Vec::with_capacity(count);
            for _ in 0..count {
                partitions.push(input.read_string()?);
            }
            Some(partitions)
        } else {
            None
        };

        Ok(StoragePut {
            coordinator_txn,
            table,
            entries,
            partitions,
        })
    }
}

/// Write outcome carried in the acknowledgment's opaque payload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutOutcome {
    pub rows_affected: u64,
}

impl PutOutcome {
    pub fn to_bytes(&self) -> ProtocolResult<Bytes> {
        Ok(Bytes::from(bincode::serialize(self)?))
    }

    pub fn from_bytes(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Acknowledgment of a storage put
///
/// Immutable once built. The layout is the same in every protocol version:
/// the result payload as a length-prefixed block, then the delimited branch
/// names as a length-prefixed string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePutAck {
    result: Bytes,
    local_transaction_names: String,
}

impl StoragePutAck {
    pub fn new(result: Bytes, local_transaction_names: impl Into<String>) -> Self {
        Self {
            result,
            local_transaction_names: local_transaction_names.into(),
        }
    }

    /// Build an acknowledgment for `outcome` produced by branches `names`
    pub fn from_outcome<S: AsRef<str>>(outcome: PutOutcome, names: &[S]) -> ProtocolResult<Self> {
        Ok(Self::new(outcome.to_bytes()?, join_names(names)))
    }

    /// Opaque engine result payload
    pub fn result(&self) -> &Bytes {
        &self.result
    }

    /// Delimited list of local transaction branch names
    pub fn local_transaction_names(&self) -> &str {
        &self.local_transaction_names
    }

    /// Branch names as a list
    pub fn transaction_names(&self) -> Vec<String> {
        split_names(&self.local_transaction_names)
    }

    /// Decode the payload as a [`PutOutcome`]
    pub fn outcome(&self) -> ProtocolResult<PutOutcome> {
        PutOutcome::from_bytes(&self.result)
    }
}

impl Packet for StoragePutAck {
    fn packet_type(&self) -> PacketType {
        PacketType::StoragePutAck
    }

    fn encode(&self, out: &mut NetOutput, _version: u16) -> ProtocolResult<()> {
        out.write_bytes(&self.result)
            .write_string(&self.local_transaction_names);
        Ok(())
    }
}

impl PacketDecoder for StoragePutAck {
    const PACKET_TYPE: PacketType = PacketType::StoragePutAck;

    fn decode(input: &mut NetInput, _version: u16) -> ProtocolResult<Self> {
        let result = input.read_bytes()?;
        let local_transaction_names = input.read_string()?;
        Ok(StoragePutAck {
            result,
            local_transaction_names,
        })
    }
}

/// Join branch names into the delimited wire form
pub fn join_names<S: AsRef<str>>(names: &[S]) -> String {
    let mut joined = String::new();
    for (i, name) in names.iter().enumerate() {
        if i > 0 {
            joined.push(NAME_DELIMITER);
        }
        joined.push_str(name.as_ref());
    }
    joined
}

/// Split the delimited wire form into branch names, skipping empty items
pub fn split_names(names: &str) -> Vec<String> {
    names
        .split(NAME_DELIMITER)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}
