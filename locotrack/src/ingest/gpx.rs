//! Append-only GPX track files, one per sending host.
//!
//! The file is created once with a fixed preamble and the closing tags. Each
//! new track point overwrites the closing tags and writes them again after
//! itself, so the document on disk is complete after every append:
//!
//! ```text
//! <?xml ...?><gpx ...><trk><name>host</name><trkseg>     preamble (once)
//!   <trkpt .../>                                          one per fix
//!   <trkpt .../>
//! </trkseg></trk></gpx>                                   tail (always last)
//! ```
//!
//! If the file does not end with the expected tail (edited by hand, written
//! by an older tool) it is left intact and the point is appended together
//! with a fresh tail.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::DateTime;
use tracing::{debug, info, warn};

use super::admission::AdmittedFix;
use super::SinkError;

/// Closing tags kept at the end of every track file.
const GPX_TAIL: &str = "    </trkseg>\n  </trk>\n</gpx>\n";

/// Writes admitted fixes to `<dir>/<hostname>.gpx`.
#[derive(Debug, Clone)]
pub struct GpxSink {
    dir: PathBuf,
}

impl GpxSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the track file for a host.
    pub fn path_for(&self, hostname: &str) -> PathBuf {
        let safe: String = hostname
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.gpx", safe.trim_start_matches('.')))
    }

    /// Append one track point to the host's file, creating it if needed.
    pub fn append(&self, hostname: &str, fix: &AdmittedFix<'_>) -> Result<(), SinkError> {
        let path = self.path_for(hostname);
        if !path.exists() {
            create_track_file(&path, hostname)?;
            info!(path = %path.display(), host = hostname, "Created GPX track file");
        }

        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
        let fragment = track_point(fix);

        if ends_with_tail(&mut file)? {
            file.seek(SeekFrom::End(-(GPX_TAIL.len() as i64)))?;
        } else {
            warn!(
                path = %path.display(),
                "GPX file does not end with closing tags, appending without rewrite"
            );
            file.seek(SeekFrom::End(0))?;
        }
        file.write_all(fragment.as_bytes())?;
        file.write_all(GPX_TAIL.as_bytes())?;
        file.flush()?;

        debug!(host = hostname, ts = fix.timestamp, "GPX point written");
        Ok(())
    }
}

fn create_track_file(path: &Path, hostname: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(preamble(hostname).as_bytes())?;
    file.write_all(GPX_TAIL.as_bytes())?;
    file.flush()
}

fn ends_with_tail(file: &mut File) -> io::Result<bool> {
    let len = file.metadata()?.len();
    let tail_len = GPX_TAIL.len() as u64;
    if len < tail_len {
        return Ok(false);
    }
    file.seek(SeekFrom::Start(len - tail_len))?;
    let mut buf = vec![0u8; GPX_TAIL.len()];
    file.read_exact(&mut buf)?;
    Ok(buf == GPX_TAIL.as_bytes())
}

fn preamble(hostname: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <gpx version=\"1.1\" creator=\"locotrack\" xmlns=\"http://www.topografix.com/GPX/1/1\">\n  \
         <trk>\n    \
         <name>{}</name>\n    \
         <trkseg>\n",
        escape_xml(hostname)
    )
}

fn track_point(fix: &AdmittedFix<'_>) -> String {
    let mut point = format!(
        "      <trkpt lat=\"{:.7}\" lon=\"{:.7}\">\n",
        fix.latitude, fix.longitude
    );
    if let Some(altitude) = fix.location.altitude {
        point.push_str(&format!("        <ele>{:.1}</ele>\n", altitude));
    }
    if let Some(time) = DateTime::from_timestamp(fix.timestamp, 0) {
        point.push_str(&format!(
            "        <time>{}</time>\n",
            time.format("%Y-%m-%dT%H:%M:%SZ")
        ));
    }
    if let Some(provider) = &fix.location.provider {
        point.push_str(&format!("        <src>{}</src>\n", escape_xml(provider)));
    }
    point.push_str("      </trkpt>\n");
    point
}

fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Location;
    use quick_xml::events::Event;
    use quick_xml::Reader;
    use tempfile::TempDir;

    fn location(alt: Option<f64>) -> Location {
        Location {
            latitude: Some(45.0),
            longitude: Some(9.0),
            altitude: alt,
            provider: Some("gps".to_string()),
            ..Default::default()
        }
    }

    fn admitted(ts: i64, location: &Location) -> AdmittedFix<'_> {
        AdmittedFix {
            timestamp: ts,
            latitude: location.latitude.unwrap(),
            longitude: location.longitude.unwrap(),
            elapsed_secs: 0.0,
            location,
        }
    }

    /// Parse the whole document and return the number of `<trkpt>` elements.
    fn parse_track_points(xml: &str) -> usize {
        let mut reader = Reader::from_str(xml);
        let mut depth = 0i32;
        let mut points = 0;
        loop {
            match reader.read_event().expect("GPX should be well-formed") {
                Event::Start(e) => {
                    depth += 1;
                    if e.name().as_ref() == b"trkpt" {
                        points += 1;
                    }
                }
                Event::End(_) => depth -= 1,
                Event::Eof => break,
                _ => {}
            }
        }
        assert_eq!(depth, 0, "every element should be closed");
        points
    }

    #[test]
    fn test_first_append_creates_complete_document() {
        let dir = TempDir::new().unwrap();
        let sink = GpxSink::new(dir.path());
        let loc = location(Some(100.0));

        sink.append("dev1", &admitted(1_700_000_000, &loc)).unwrap();

        let xml = fs::read_to_string(sink.path_for("dev1")).unwrap();
        assert!(xml.starts_with("<?xml"));
        assert!(xml.ends_with(GPX_TAIL));
        assert!(xml.contains("<name>dev1</name>"));
        assert!(xml.contains("<trkpt lat=\"45.0000000\" lon=\"9.0000000\">"));
        assert!(xml.contains("<ele>100.0</ele>"));
        assert!(xml.contains("<time>2023-11-14T22:13:20Z</time>"));
        assert_eq!(parse_track_points(&xml), 1);
    }

    #[test]
    fn test_every_append_leaves_a_parseable_document() {
        let dir = TempDir::new().unwrap();
        let sink = GpxSink::new(dir.path());
        let loc = location(None);

        for i in 0..5 {
            sink.append("dev1", &admitted(1_700_000_000 + i, &loc))
                .unwrap();
            // No finalization step exists: the file must parse at any point.
            let xml = fs::read_to_string(sink.path_for("dev1")).unwrap();
            assert_eq!(parse_track_points(&xml), (i + 1) as usize);
        }

        let xml = fs::read_to_string(sink.path_for("dev1")).unwrap();
        assert_eq!(xml.matches("<?xml").count(), 1, "preamble written once");
        assert!(!xml.contains("<ele>"));
    }

    #[test]
    fn test_foreign_tail_is_not_truncated() {
        let dir = TempDir::new().unwrap();
        let sink = GpxSink::new(dir.path());
        let path = sink.path_for("dev1");
        fs::write(&path, "<!-- hand edited -->\n").unwrap();

        let loc = location(None);
        sink.append("dev1", &admitted(1_700_000_000, &loc)).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("<!-- hand edited -->\n"));
        assert!(content.ends_with(GPX_TAIL));
    }

    #[test]
    fn test_hosts_get_separate_sanitized_files() {
        let dir = TempDir::new().unwrap();
        let sink = GpxSink::new(dir.path());
        assert_eq!(sink.path_for("dev1"), dir.path().join("dev1.gpx"));
        assert_eq!(sink.path_for("../etc/x"), dir.path().join("_etc_x.gpx"));
    }

    #[test]
    fn test_escape_xml() {
        assert_eq!(escape_xml("a<b>&\"c'"), "a&lt;b&gt;&amp;&quot;c&apos;");
    }
}
