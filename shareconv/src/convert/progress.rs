//! Converter output parsing and progress reporting.
//!
//! ffmpeg prints the input duration once (`Duration: HH:MM:SS.ms, ...`) and
//! then a stats line per update (`frame=.. time=HH:MM:SS.ms .. speed=1.5x`).
//! Percent is elapsed output time over input duration. ImageMagick prints
//! nothing useful, so image jobs go straight from 0 to 100.

use tokio::sync::mpsc;

use super::MediaKind;

/// A progress sample for one running job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    /// 0..=100
    pub percent: u8,
    /// Encoder throughput, e.g. `"2.5x"`.
    pub speed: Option<String>,
}

/// Sends progress samples from a converter to the job's worker.
#[derive(Clone)]
pub struct ProgressReporter {
    tx: mpsc::Sender<ProgressUpdate>,
}

impl ProgressReporter {
    pub fn new(tx: mpsc::Sender<ProgressUpdate>) -> Self {
        Self { tx }
    }

    pub fn noop() -> Self {
        let (tx, _rx) = mpsc::channel::<ProgressUpdate>(1);
        Self::new(tx)
    }

    /// Best-effort: samples are dropped when the receiver lags.
    pub fn report(&self, update: ProgressUpdate) {
        let _ = self.tx.try_send(update);
    }
}

/// Parse time string in HH:MM:SS.ms format to seconds.
///
/// ```ignore
/// assert_eq!(parse_time("00:00:10.50"), Some(10.5));
/// assert_eq!(parse_time("100:00:00.00"), Some(360000.0));
/// ```
pub fn parse_time(time_str: &str) -> Option<f64> {
    let parts: Vec<&str> = time_str.split(':').collect();
    if parts.len() != 3 {
        return None;
    }

    let hours: f64 = parts[0].parse().ok()?;
    let minutes: f64 = parts[1].parse().ok()?;
    let seconds: f64 = parts[2].parse().ok()?;

    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Parse the time field of a stats line (e.g. "time=00:01:30.50").
pub fn parse_time_field(line: &str) -> Option<f64> {
    let time_start = line.find("time=")?;
    let time_str = &line[time_start + 5..];
    let end = time_str.find(' ').unwrap_or(time_str.len());
    parse_time(&time_str[..end])
}

/// Parse the input duration (e.g. "  Duration: 00:00:10.00, start: 0.000000").
pub fn parse_duration(line: &str) -> Option<f64> {
    let start = line.find("Duration:")?;
    let rest = line[start + 9..].trim_start();
    let end = rest.find(',').unwrap_or(rest.len());
    parse_time(rest[..end].trim())
}

/// Parse the speed label of a stats line (e.g. "speed=1.25x" gives "1.25x").
pub fn parse_speed(line: &str) -> Option<String> {
    let speed_start = line.find("speed=")?;
    let speed_str = &line[speed_start + 6..];
    let end = speed_str.find('x')?;
    let value = speed_str[..end].trim();
    value.parse::<f64>().ok()?;
    Some(format!("{}x", value))
}

/// Whether a line is a periodic stats line rather than a diagnostic.
pub fn is_stats_line(line: &str) -> bool {
    line.contains("time=") && (line.contains("frame=") || line.contains("size="))
}

/// Stateful parser turning converter output lines into progress samples.
#[derive(Debug)]
pub struct ProgressParser {
    kind: MediaKind,
    duration: Option<f64>,
    last: ProgressUpdate,
}

impl ProgressParser {
    pub fn new(kind: MediaKind) -> Self {
        Self {
            kind,
            duration: None,
            last: ProgressUpdate {
                percent: 0,
                speed: None,
            },
        }
    }

    /// Feed one output line. Returns a sample only when percent or speed
    /// changed. Percent never decreases.
    pub fn feed(&mut self, line: &str) -> Option<ProgressUpdate> {
        if self.kind == MediaKind::Image {
            return None;
        }

        if self.duration.is_none()
            && let Some(duration) = parse_duration(line).filter(|d| *d > 0.0)
        {
            self.duration = Some(duration);
            return None;
        }

        let total = self.duration?;
        let elapsed = parse_time_field(line)?;

        let percent = ((elapsed / total) * 100.0).clamp(0.0, 100.0) as u8;
        let update = ProgressUpdate {
            percent: percent.max(self.last.percent),
            speed: parse_speed(line).or_else(|| self.last.speed.clone()),
        };

        if update == self.last {
            return None;
        }
        self.last = update.clone();
        Some(update)
    }

    /// Input duration in seconds, once known.
    pub fn duration(&self) -> Option<f64> {
        self.duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_time() {
        assert_eq!(parse_time("00:00:10.50"), Some(10.5));
        assert_eq!(parse_time("01:30:00.00"), Some(5400.0));
        assert_eq!(parse_time("100:00:04.50"), Some(360004.5));
        assert_eq!(parse_time("00:00:01.500"), Some(1.5));
        assert_eq!(parse_time("N/A"), None);
        assert_eq!(parse_time("00:00"), None);
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(
            parse_duration("  Duration: 01:30:15.50, start: 0.000000, bitrate: 1234 kb/s"),
            Some(5415.5)
        );
        assert_eq!(parse_duration("Duration: 00:00:01.5, start: 0.000000"), Some(1.5));
        assert_eq!(parse_duration("  Duration: N/A, bitrate: N/A"), None);
        assert_eq!(parse_duration("Stream #0:0: Video: h264"), None);
    }

    #[test]
    fn test_parse_speed() {
        let line = "frame=  123 fps=0.0 q=0.0 size=       0kB time=00:00:05.12 bitrate=   0.0kbits/s speed=10.2x";
        assert_eq!(parse_speed(line), Some("10.2x".to_string()));
        assert_eq!(parse_speed("speed= 1.5x"), Some("1.5x".to_string()));
        assert_eq!(parse_speed("speed=N/A"), None);
        assert_eq!(parse_speed("no speed"), None);
    }

    #[test]
    fn test_parser_tracks_percent_against_duration() {
        let mut parser = ProgressParser::new(MediaKind::Video);

        assert_eq!(parser.feed("frame=1 time=00:00:01.00 speed=1.0x"), None);
        assert_eq!(parser.feed("  Duration: 00:00:10.00, start: 0.000000"), None);
        assert_eq!(parser.duration(), Some(10.0));

        let update = parser
            .feed("frame=  60 fps=30 size=100kB time=00:00:02.50 bitrate=1.0kbits/s speed=2.0x")
            .unwrap();
        assert_eq!(update.percent, 25);
        assert_eq!(update.speed.as_deref(), Some("2.0x"));

        // Same values again: no sample.
        assert_eq!(
            parser.feed("frame=  61 fps=30 size=100kB time=00:00:02.51 bitrate=1.0kbits/s speed=2.0x"),
            None
        );

        let update = parser.feed("frame=300 time=00:00:12.00 speed=2.1x").unwrap();
        assert_eq!(update.percent, 100);
    }

    #[test]
    fn test_parser_percent_is_monotonic() {
        let mut parser = ProgressParser::new(MediaKind::Video);
        parser.feed("Duration: 00:01:40.00, start: 0.0");

        assert_eq!(parser.feed("frame=1 time=00:00:50.00 speed=1.0x").unwrap().percent, 50);
        let update = parser.feed("frame=2 time=00:00:10.00 speed=3.0x").unwrap();
        assert_eq!(update.percent, 50);
        assert_eq!(update.speed.as_deref(), Some("3.0x"));
    }

    #[test]
    fn test_image_parser_ignores_output() {
        let mut parser = ProgressParser::new(MediaKind::Image);
        assert_eq!(parser.feed("Duration: 00:00:10.00"), None);
        assert_eq!(parser.feed("frame=1 time=00:00:05.00 speed=1.0x"), None);
    }

    #[test]
    fn test_is_stats_line() {
        assert!(is_stats_line("frame=  10 fps=0.0 q=-1.0 size=0kB time=00:00:00.40 bitrate=N/A"));
        assert!(!is_stats_line("Input #0, mov,mp4,m4a,3gp,3g2,mj2, from 'a.mov':"));
    }

    #[tokio::test]
    async fn test_reporter_delivers_updates() {
        let (tx, mut rx) = mpsc::channel(4);
        let reporter = ProgressReporter::new(tx);
        reporter.report(ProgressUpdate {
            percent: 42,
            speed: None,
        });
        assert_eq!(rx.recv().await.unwrap().percent, 42);

        ProgressReporter::noop().report(ProgressUpdate {
            percent: 1,
            speed: None,
        });
    }
}
