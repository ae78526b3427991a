use std::{fs, path::Path};

use anyhow::Context;

pub trait Asset: Sized + bincode::Encode + bincode::Decode<()> {
    fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let data = bincode::encode_to_vec(self, bincode::config::standard())?;

        fs::write(path.as_ref(), data)
            .with_context(|| format!("writing {}", path.as_ref().display()))?;

        Ok(())
    }

    fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let data = fs::read(path.as_ref())
            .with_context(|| format!("reading {}", path.as_ref().display()))?;

        let (asset, _) = bincode::decode_from_slice(&data, bincode::config::standard())?;
        Ok(asset)
    }
}
