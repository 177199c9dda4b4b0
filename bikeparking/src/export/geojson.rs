//! Écriture GeoJSON de la collection fusionnée (streaming avec geozero)

use std::borrow::Cow;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use fusion::{MergedFeature, SourceKind};
use geo::{Centroid, Geometry};
use geozero::geojson::GeoJsonWriter;
use geozero::GeozeroGeometry;

/// Options d'écriture
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// Features contributives réduites à leur centroïde
    pub crowd_as_points: bool,
}

/// Écrit des features dans un fichier GeoJSON (WGS84)
pub fn write_collection<'a, I>(features: I, options: WriteOptions, output_path: &Path) -> Result<usize>
where
    I: IntoIterator<Item = &'a MergedFeature>,
{
    let file = File::create(output_path)
        .context(format!("Failed to create file: {}", output_path.display()))?;
    let mut writer = BufWriter::new(file);

    let count = write_features(&mut writer, features, options)?;
    writer.flush()?;

    Ok(count)
}

/// Écrit un FeatureCollection complet dans `writer`
pub fn write_features<'a, W, I>(writer: &mut W, features: I, options: WriteOptions) -> Result<usize>
where
    W: Write,
    I: IntoIterator<Item = &'a MergedFeature>,
{
    write!(writer, r#"{{"type":"FeatureCollection","features":["#)?;

    let mut count = 0;
    for feature in features {
        if count > 0 {
            write!(writer, ",")?;
        }
        write_feature(writer, feature, options)?;
        count += 1;
    }

    write!(writer, "]}}")?;
    Ok(count)
}

/// Écrit une feature en GeoJSON
fn write_feature<W: Write>(writer: &mut W, feature: &MergedFeature, options: WriteOptions) -> Result<()> {
    let id = feature.key().to_string();
    write!(writer, r#"{{"type":"Feature","id":"{}","#, escape_json(&id))?;

    write!(writer, r#""geometry":"#)?;
    let geometry = display_geometry(feature, options);
    let mut geom_buf = Vec::new();
    let mut geom_writer = GeoJsonWriter::new(&mut geom_buf);
    geometry.process_geom(&mut geom_writer)?;
    writer.write_all(&geom_buf)?;

    write!(
        writer,
        r#","properties":{{"source":"{}","native_id":"{}""#,
        escape_json(&feature.source_id),
        escape_json(&feature.native_id)
    )?;
    for (key, value) in &feature.attributes {
        if key == "source" || key == "native_id" || key == "meta_contributors" {
            continue;
        }
        write!(writer, r#","{}":"{}""#, escape_json(key), escape_json(value))?;
    }

    write!(writer, r#","meta_contributors":["#)?;
    for (i, contributor) in feature.contributors.iter().enumerate() {
        if i > 0 {
            write!(writer, ",")?;
        }
        write!(
            writer,
            r#"{{"source_id":"{}","native_id":"{}"}}"#,
            escape_json(&contributor.source_id),
            escape_json(&contributor.native_id)
        )?;
    }
    write!(writer, "]}}}}")?;

    Ok(())
}

fn display_geometry(feature: &MergedFeature, options: WriteOptions) -> Cow<'_, Geometry> {
    if !options.crowd_as_points || feature.kind != SourceKind::CrowdSourced {
        return Cow::Borrowed(&feature.geometry);
    }
    match &feature.geometry {
        Geometry::Point(_) => Cow::Borrowed(&feature.geometry),
        other => match other.centroid() {
            Some(point) => Cow::Owned(Geometry::Point(point)),
            None => Cow::Borrowed(&feature.geometry),
        },
    }
}

/// Échappe une chaîne pour JSON
fn escape_json(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => result.push_str("\\\""),
            '\\' => result.push_str("\\\\"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            c if c.is_control() => {
                result.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => result.push(c),
        }
    }
    result
}
