//! Archivage d'un run (.tar.bz2)
//!
//! Une archive par jour : entrées normalisées, registre d'exclusions et
//! fichiers publiés, sous `<sortie>/archive/<AAAA-MM-JJ>/`.

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use bzip2::write::BzEncoder;
use bzip2::Compression;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use tar::Builder;
use tracing::{debug, info};

/// Contenu d'une archive
#[derive(Debug, Default)]
pub struct ArchiveContent {
    pub inputs: Vec<PathBuf>,
    pub registry: Option<PathBuf>,
    pub outputs: Vec<PathBuf>,
}

/// Date locale du run dans le fuseau configuré
pub fn local_date(now: DateTime<Utc>, timezone: &str) -> Result<NaiveDate> {
    let tz: Tz = timezone
        .parse()
        .map_err(|e| anyhow!("Unknown timezone {}: {}", timezone, e))?;
    Ok(now.with_timezone(&tz).date_naive())
}

/// Entrées normalisées présentes dans le dossier d'entrée
pub fn collect_inputs(input_dir: &Path) -> Result<Vec<PathBuf>> {
    let pattern = input_dir.join("*-normalized.geojson");
    let pattern = pattern
        .to_str()
        .ok_or_else(|| anyhow!("Non UTF-8 input path: {}", input_dir.display()))?;

    let mut inputs = Vec::new();
    for entry in glob::glob(pattern).context("Invalid input pattern")? {
        inputs.push(entry?);
    }
    inputs.sort();
    Ok(inputs)
}

/// Crée l'archive du jour et retourne son chemin
pub fn create_archive(output_dir: &Path, date: NaiveDate, content: &ArchiveContent) -> Result<PathBuf> {
    let day = date.format("%Y-%m-%d").to_string();
    let dir = output_dir.join("archive").join(&day);
    std::fs::create_dir_all(&dir)
        .context(format!("Failed to create directory: {}", dir.display()))?;

    let path = dir.join(format!("bikeparking-{}.tar.bz2", day));
    let file = File::create(&path).context(format!("Failed to create {}", path.display()))?;
    let mut builder = Builder::new(BzEncoder::new(file, Compression::best()));

    append_all(&mut builder, "inputs", &content.inputs)?;
    if let Some(registry) = &content.registry {
        append_all(&mut builder, "registry", std::slice::from_ref(registry))?;
    }
    append_all(&mut builder, "outputs", &content.outputs)?;

    builder
        .into_inner()
        .and_then(|encoder| encoder.finish())
        .context("Failed to finalize archive")?;

    info!(path = %path.display(), "Archive created");
    Ok(path)
}

fn append_all(builder: &mut Builder<BzEncoder<File>>, folder: &str, files: &[PathBuf]) -> Result<()> {
    for file in files {
        let name = file
            .file_name()
            .ok_or_else(|| anyhow!("Not a file: {}", file.display()))?;
        let entry = Path::new(folder).join(name);
        builder
            .append_path_with_name(file, &entry)
            .with_context(|| format!("Failed to archive {}", file.display()))?;
        debug!(entry = %entry.display(), "Archived");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bzip2::read::BzDecoder;
    use chrono::TimeZone;
    use tar::Archive;

    #[test]
    fn test_local_date_uses_timezone() {
        // 02:00 UTC le 15 octobre, encore le 14 à Toronto
        let now = Utc.with_ymd_and_hms(2026, 10, 15, 2, 0, 0).unwrap();
        assert_eq!(
            local_date(now, "America/Toronto").unwrap(),
            NaiveDate::from_ymd_opt(2026, 10, 14).unwrap()
        );
        assert_eq!(
            local_date(now, "UTC").unwrap(),
            NaiveDate::from_ymd_opt(2026, 10, 15).unwrap()
        );
        assert!(local_date(now, "Mars/Olympus").is_err());
    }

    #[test]
    fn test_create_archive() {
        let dir = std::env::temp_dir().join(format!("bikeparking_archive_{}", std::process::id()));
        let input_dir = dir.join("normalized");
        std::fs::create_dir_all(&input_dir).unwrap();
        std::fs::write(input_dir.join("osm-normalized.geojson"), "{}").unwrap();
        std::fs::write(input_dir.join("notes.txt"), "x").unwrap();
        let output = dir.join("all_sources.geojson");
        std::fs::write(&output, "{}").unwrap();

        let content = ArchiveContent {
            inputs: collect_inputs(&input_dir).unwrap(),
            registry: None,
            outputs: vec![output],
        };
        assert_eq!(content.inputs.len(), 1);

        let date = NaiveDate::from_ymd_opt(2026, 10, 14).unwrap();
        let path = create_archive(&dir, date, &content).unwrap();
        assert!(path.ends_with("archive/2026-10-14/bikeparking-2026-10-14.tar.bz2"));

        let mut archive = Archive::new(BzDecoder::new(File::open(&path).unwrap()));
        let mut names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["inputs/osm-normalized.geojson", "outputs/all_sources.geojson"]);

        std::fs::remove_dir_all(&dir).ok();
    }
}
