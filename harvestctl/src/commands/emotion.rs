use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;

use clap::Subcommand;
use harvest_core::storage::{export_unscored_reviews, import_emotion_scores};
use harvest_core::HarvestDatabase;
use serde::Serialize;
use tracing::info;

use crate::Result;

#[derive(Subcommand, Debug)]
pub enum EmotionCommands {
    /// Writes reviews without emotion scores to a CSV file
    Export {
        /// Destination CSV
        file: PathBuf,
    },
    /// Loads a labelled CSV (r_idx plus one column per emotion type)
    Import {
        /// Source CSV
        file: PathBuf,
    },
}

#[derive(Debug, Serialize)]
pub struct EmotionTransfer {
    pub direction: &'static str,
    pub file: PathBuf,
    pub rows: usize,
}

impl EmotionCommands {
    pub fn execute(&self, db: &HarvestDatabase) -> Result<EmotionTransfer> {
        match self {
            EmotionCommands::Export { file } => {
                let writer = BufWriter::new(File::create(file)?);
                let rows = export_unscored_reviews(db, writer)?;
                info!(file = %file.display(), rows, "exported unscored reviews");
                Ok(EmotionTransfer {
                    direction: "export",
                    file: file.clone(),
                    rows,
                })
            }
            EmotionCommands::Import { file } => {
                let reader = BufReader::new(File::open(file)?);
                let rows = import_emotion_scores(db, reader)?;
                info!(file = %file.display(), rows, "imported emotion scores");
                Ok(EmotionTransfer {
                    direction: "import",
                    file: file.clone(),
                    rows,
                })
            }
        }
    }
}
