/// Repository archive fixtures
/// Builds small but well-formed CARv1 files with real CIDs for tests and benches
use ciborium::Value;
use cid::multihash::Multihash;
use cid::Cid;
use iroh_car::{CarHeader, CarWriter};
use sha2::{Digest, Sha256};

const DAG_CBOR: u64 = 0x71;
const RAW: u64 = 0x55;
const SHA2_256: u64 = 0x12;

fn cbor(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    // serializing an in-memory Value into a Vec cannot fail
    let _ = ciborium::ser::into_writer(value, &mut out);
    out
}

fn cid_with_codec(codec: u64, block: &[u8]) -> anyhow::Result<Cid> {
    let digest = Multihash::<64>::wrap(SHA2_256, &Sha256::digest(block))?;
    Ok(Cid::new_v1(codec, digest))
}

/// CIDv1 (dag-cbor, sha2-256) of a block
pub fn cid_for(block: &[u8]) -> anyhow::Result<Cid> {
    cid_with_codec(DAG_CBOR, block)
}

/// Builder for a CARv1 archive
#[derive(Default)]
pub struct CarBuilder {
    blocks: Vec<(u64, Vec<u8>)>,
}

impl CarBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A record block `{ "$type": <tag>, "text": <text> }`
    pub fn record(mut self, tag: &str, text: &str) -> Self {
        let value = Value::Map(vec![
            (Value::Text("$type".into()), Value::Text(tag.into())),
            (Value::Text("text".into()), Value::Text(text.into())),
            (
                Value::Text("createdAt".into()),
                Value::Text("2026-01-01T00:00:00.000Z".into()),
            ),
        ]);
        self.blocks.push((DAG_CBOR, cbor(&value)));
        self
    }

    /// An MST-node-shaped block with no `$type`
    pub fn structural_block(mut self) -> Self {
        let n = self.blocks.len() as u64;
        let value = Value::Map(vec![
            (Value::Text("e".into()), Value::Array(vec![])),
            (Value::Text("l".into()), Value::Null),
            (Value::Text("n".into()), Value::Integer(n.into())),
        ]);
        self.blocks.push((DAG_CBOR, cbor(&value)));
        self
    }

    /// An arbitrary block payload, addressed with the raw codec
    pub fn raw_block(mut self, data: &[u8]) -> Self {
        self.blocks.push((RAW, data.to_vec()));
        self
    }

    /// `n` post records
    pub fn posts(mut self, n: usize) -> Self {
        for i in 0..n {
            self = self.record("app.bsky.feed.post", &format!("post {i}"));
        }
        self
    }

    /// Encode the archive; the first block is the root.
    pub async fn build(self) -> anyhow::Result<Vec<u8>> {
        let root = match self.blocks.first() {
            Some((codec, block)) => cid_with_codec(*codec, block)?,
            None => cid_for(b"")?,
        };

        let mut writer = CarWriter::new(CarHeader::new_v1(vec![root]), Vec::new());
        for (codec, block) in &self.blocks {
            writer.write(cid_with_codec(*codec, block)?, block).await?;
        }
        Ok(writer.finish().await?)
    }
}
