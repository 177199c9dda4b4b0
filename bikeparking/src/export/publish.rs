//! Publication atomique des fichiers d'affichage
//!
//! Tous les fichiers sont écrits dans des fichiers `.tmp` voisins, puis
//! renommés. En cas d'échec les temporaires sont supprimés et les fichiers
//! publiés précédemment restent en place.
//!
//! `all_sources.geojson` est renommé en dernier : il n'est remplacé que si
//! les fichiers partiels l'ont été.

use std::ffi::OsStr;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fusion::{FusedCollection, MergedFeature, SourceKind};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::geojson::{write_collection, WriteOptions};

/// Collection fusionnée complète
pub const ALL_SOURCES: &str = "all_sources.geojson";
/// Features contributives conservées
pub const CROWD_SOURCED: &str = "crowd_sourced.geojson";
/// Features municipales après regroupement et déduplication
pub const MUNICIPAL: &str = "municipal.geojson";

/// Fichier publié
#[derive(Debug, Clone, Serialize)]
pub struct PublishedFile {
    pub path: PathBuf,
    pub features: usize,
    /// Empreinte blake3 du contenu (hex)
    pub checksum: String,
}

/// Sélection de features d'un fichier de sortie
#[derive(Debug, Clone, Copy)]
enum Selection {
    All,
    Kind(SourceKind),
}

impl Selection {
    fn accepts(self, feature: &MergedFeature) -> bool {
        match self {
            Self::All => true,
            Self::Kind(kind) => feature.kind == kind,
        }
    }
}

const OUTPUTS: [(&str, Selection); 3] = [
    (ALL_SOURCES, Selection::All),
    (CROWD_SOURCED, Selection::Kind(SourceKind::CrowdSourced)),
    (MUNICIPAL, Selection::Kind(SourceKind::Municipal)),
];

/// Publie la collection dans `output_dir`
pub fn publish(
    fused: &FusedCollection,
    output_dir: &Path,
    options: WriteOptions,
) -> Result<Vec<PublishedFile>> {
    std::fs::create_dir_all(output_dir)
        .context(format!("Failed to create directory: {}", output_dir.display()))?;

    let mut staged: Vec<(PathBuf, PathBuf, usize)> = Vec::with_capacity(OUTPUTS.len());

    for (name, selection) in OUTPUTS {
        let target = output_dir.join(name);
        let temp = temp_path(&target);
        let features = fused.features.iter().filter(|f| selection.accepts(f));

        match write_collection(features, options, &temp) {
            Ok(count) => staged.push((temp, target, count)),
            Err(e) => {
                discard_temp(&temp);
                discard_staged(&staged);
                return Err(e.context(format!("Failed to stage {}", name)));
            }
        }
    }

    let mut published = Vec::with_capacity(staged.len());
    for (temp, target, count) in &staged {
        match compute_file_checksum(temp) {
            Ok(checksum) => published.push(PublishedFile {
                path: target.clone(),
                features: *count,
                checksum,
            }),
            Err(e) => {
                discard_staged(&staged);
                return Err(e);
            }
        }
    }

    let mut order: Vec<&(PathBuf, PathBuf, usize)> = staged.iter().collect();
    order.sort_by_key(|(_, target, _)| target.file_name() == Some(OsStr::new(ALL_SOURCES)));

    for (index, (temp, target, count)) in order.iter().enumerate() {
        if let Err(e) = std::fs::rename(temp, target) {
            for (pending, _, _) in &order[index..] {
                discard_temp(pending);
            }
            return Err(anyhow::Error::new(e)
                .context(format!("Failed to publish {}", target.display())));
        }
        debug!(path = %target.display(), features = count, "File published");
    }

    info!(
        files = published.len(),
        dir = %output_dir.display(),
        "Outputs published"
    );
    Ok(published)
}

fn temp_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    target.with_file_name(name)
}

fn discard_staged(staged: &[(PathBuf, PathBuf, usize)]) {
    for (temp, _, _) in staged {
        discard_temp(temp);
    }
}

fn discard_temp(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "Failed to remove temporary file");
        }
    }
}

/// Empreinte blake3 d'un fichier
pub fn compute_file_checksum(path: &Path) -> Result<String> {
    let mut file = File::open(path).with_context(|| format!("Cannot open {}", path.display()))?;
    let mut hasher = blake3::Hasher::new();
    let mut buffer = [0u8; 65536]; // 64KB buffer

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize().to_hex().to_string())
}
