use anyhow::{Context, Result, anyhow, bail};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    Synthetic,
    Device,
    Network,
}

impl SourceKind {
    pub(crate) fn from_uri(uri: &str) -> Self {
        if uri == "synthetic" || uri.starts_with("synthetic:") {
            SourceKind::Synthetic
        } else if uri.starts_with("/dev/video") || uri.parse::<u32>().is_ok() {
            SourceKind::Device
        } else {
            SourceKind::Network
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum AnnotatorKind {
    None,
    Shapes,
}

impl AnnotatorKind {
    fn parse(value: &str) -> Result<Self> {
        match value {
            "none" => Ok(AnnotatorKind::None),
            "shapes" => Ok(AnnotatorKind::Shapes),
            other => bail!("unknown annotator {other:?} (expected: none, shapes)"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct StreamConfig {
    pub source_uri: String,
    pub source_kind: SourceKind,
    pub listen_addr: String,
    pub width: i32,
    pub height: i32,
    pub capture_fps: u32,
    pub jpeg_quality: u8,
    pub(crate) annotator: AnnotatorKind,
    pub max_clients: usize,
    pub stream_interval_ms: u64,
    pub verbose: bool,
}

const STREAM_USAGE: &str = "Usage: roadcam [--source <uri>] [--listen <addr:port>] \
[--width <px>] [--height <px>] [--fps <n>] [--jpeg-quality <1-100>] \
[--annotator <none|shapes>] [--max-clients <n>] [--stream-interval-ms <n>] \
[--verbose]\n\nPositional form is also supported: roadcam <source-uri> [...flags...]\n\
Sources: a V4L2 device (\"0\", \"/dev/video0\"), any FFmpeg-readable URI, or \
\"synthetic:\" for a camera-less test pattern.";

impl StreamConfig {
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut source_uri: Option<String> = None;
        let mut listen_addr: Option<String> = None;
        let mut width: Option<i32> = None;
        let mut height: Option<i32> = None;
        let mut capture_fps: Option<u32> = None;
        let mut jpeg_quality: Option<u8> = None;
        let mut annotator: Option<AnnotatorKind> = None;
        let mut max_clients: Option<usize> = None;
        let mut stream_interval_ms: Option<u64> = None;
        let mut verbose = false;
        let mut positional: Vec<String> = Vec::new();

        let mut idx = 1;
        while idx < args.len() {
            match args[idx].as_str() {
                "--help" | "-h" => {
                    bail!(STREAM_USAGE);
                }
                "--source" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--source requires a value"))?
                        .clone();
                    source_uri = Some(value);
                    idx += 1;
                }
                "--listen" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--listen requires a value"))?
                        .clone();
                    listen_addr = Some(value);
                    idx += 1;
                }
                "--width" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--width requires a value"))?
                        .parse::<i32>()
                        .with_context(|| "--width must be a positive integer".to_string())?;
                    if value <= 0 {
                        bail!("--width must be a positive integer");
                    }
                    width = Some(value);
                    idx += 1;
                }
                "--height" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--height requires a value"))?
                        .parse::<i32>()
                        .with_context(|| "--height must be a positive integer".to_string())?;
                    if value <= 0 {
                        bail!("--height must be a positive integer");
                    }
                    height = Some(value);
                    idx += 1;
                }
                "--fps" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--fps requires a value"))?
                        .parse::<u32>()
                        .with_context(|| "--fps must be a positive integer".to_string())?;
                    if value == 0 {
                        bail!("--fps must be at least 1");
                    }
                    capture_fps = Some(value);
                    idx += 1;
                }
                "--jpeg-quality" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--jpeg-quality requires a value"))?
                        .parse::<u8>()
                        .with_context(|| {
                            "--jpeg-quality must be an integer between 1 and 100".to_string()
                        })?;
                    if !(1..=100).contains(&value) {
                        bail!("--jpeg-quality must be an integer between 1 and 100");
                    }
                    jpeg_quality = Some(value);
                    idx += 1;
                }
                "--annotator" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--annotator requires a value"))?;
                    annotator = Some(AnnotatorKind::parse(value)?);
                    idx += 1;
                }
                "--max-clients" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--max-clients requires a value"))?
                        .parse::<usize>()
                        .with_context(|| "--max-clients must be a positive integer".to_string())?;
                    if value == 0 {
                        bail!("--max-clients must be at least 1");
                    }
                    max_clients = Some(value);
                    idx += 1;
                }
                "--stream-interval-ms" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--stream-interval-ms requires a value"))?
                        .parse::<u64>()
                        .with_context(|| {
                            "--stream-interval-ms must be a positive integer".to_string()
                        })?;
                    if value == 0 {
                        bail!("--stream-interval-ms must be at least 1");
                    }
                    stream_interval_ms = Some(value);
                    idx += 1;
                }
                "--verbose" => {
                    verbose = true;
                    idx += 1;
                }
                arg if arg.starts_with('-') => {
                    bail!("Unrecognised flag: {arg}");
                }
                other => {
                    positional.push(other.to_string());
                    idx += 1;
                }
            }
        }

        let mut positional = positional.into_iter();
        if source_uri.is_none() {
            source_uri = positional.next();
        }
        if let Some(extra) = positional.next() {
            bail!("Unexpected argument: {extra}");
        }

        let source_uri = source_uri.unwrap_or_else(|| "synthetic:".to_string());
        let source_kind = SourceKind::from_uri(&source_uri);
        let listen_addr = listen_addr.unwrap_or_else(|| "0.0.0.0:8080".to_string());

        Ok(Self {
            source_uri,
            source_kind,
            listen_addr,
            width: width.unwrap_or(640),
            height: height.unwrap_or(480),
            capture_fps: capture_fps.unwrap_or(30),
            jpeg_quality: jpeg_quality.unwrap_or(85),
            annotator: annotator.unwrap_or(AnnotatorKind::Shapes),
            max_clients: max_clients.unwrap_or(16),
            stream_interval_ms: stream_interval_ms.unwrap_or(33),
            verbose,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("roadcam")
            .chain(list.iter().copied())
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn defaults_apply_without_flags() {
        let config = StreamConfig::from_args(&args(&[])).expect("defaults parse");
        assert_eq!(config.source_kind, SourceKind::Synthetic);
        assert_eq!(config.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.width, 640);
        assert_eq!(config.height, 480);
        assert_eq!(config.max_clients, 16);
        assert_eq!(config.stream_interval_ms, 33);
        assert_eq!(config.annotator, AnnotatorKind::Shapes);
    }

    #[test]
    fn positional_source_is_accepted() {
        let config = StreamConfig::from_args(&args(&["/dev/video0"])).expect("parse");
        assert_eq!(config.source_uri, "/dev/video0");
        assert_eq!(config.source_kind, SourceKind::Device);
    }

    #[test]
    fn source_kind_detection() {
        assert_eq!(SourceKind::from_uri("synthetic:"), SourceKind::Synthetic);
        assert_eq!(SourceKind::from_uri("0"), SourceKind::Device);
        assert_eq!(SourceKind::from_uri("/dev/video2"), SourceKind::Device);
        assert_eq!(
            SourceKind::from_uri("rtsp://cam.local/stream"),
            SourceKind::Network
        );
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(StreamConfig::from_args(&args(&["--jpeg-quality", "0"])).is_err());
        assert!(StreamConfig::from_args(&args(&["--jpeg-quality", "101"])).is_err());
        assert!(StreamConfig::from_args(&args(&["--max-clients", "0"])).is_err());
        assert!(StreamConfig::from_args(&args(&["--stream-interval-ms", "0"])).is_err());
        assert!(StreamConfig::from_args(&args(&["--width", "-3"])).is_err());
    }

    #[test]
    fn rejects_unknown_flags_and_annotators() {
        assert!(StreamConfig::from_args(&args(&["--sauce", "x"])).is_err());
        assert!(StreamConfig::from_args(&args(&["--annotator", "faces"])).is_err());
    }

    #[test]
    fn flags_override_defaults() {
        let config = StreamConfig::from_args(&args(&[
            "--source",
            "synthetic:",
            "--listen",
            "127.0.0.1:9000",
            "--annotator",
            "none",
            "--max-clients",
            "2",
        ]))
        .expect("parse");
        assert_eq!(config.listen_addr, "127.0.0.1:9000");
        assert_eq!(config.annotator, AnnotatorKind::None);
        assert_eq!(config.max_clients, 2);
    }
}
