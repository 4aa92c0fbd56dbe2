use crate::av::VideoParams;
use std::collections::VecDeque;
use std::fmt::Write;

/// Advertised bandwidth for the single published variant
const DEFAULT_BANDWIDTH: u32 = 2_560_000;

/// One `#EXTINF` entry of a media playlist
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistInf {
    /// Declared duration in seconds
    pub duration: f64,
    /// URI line as written into the manifest
    pub title: String,
    /// Segment store path (`<streamPath>/<filename>`)
    pub file_path: String,
}

/// Renders the fixed header of a media playlist.
///
/// The header carries the protocol version, the media sequence of the
/// oldest listed segment and the target duration.
#[derive(Debug, Clone)]
pub struct Playlist {
    /// Playlist protocol version
    pub version: u8,
    /// Media sequence number of the first listed segment
    pub sequence: u64,
    /// `#EXT-X-TARGETDURATION` value in whole seconds
    pub target_duration: u32,
}

impl Default for Playlist {
    fn default() -> Self {
        Self {
            version: 3,
            sequence: 0,
            target_duration: 0,
        }
    }
}

impl Playlist {
    /// Writes the `#EXTM3U` header block
    pub fn write_header(&self, buf: &mut Vec<u8>) {
        let mut s = String::new();
        let _ = write!(
            s,
            "#EXTM3U\n#EXT-X-VERSION:{}\n#EXT-X-MEDIA-SEQUENCE:{}\n#EXT-X-TARGETDURATION:{}\n",
            self.version, self.sequence, self.target_duration
        );
        buf.extend_from_slice(s.as_bytes());
    }

    /// Appends one `#EXTINF` entry
    pub fn write_inf(buf: &mut Vec<u8>, inf: &PlaylistInf) {
        let mut s = String::new();
        let _ = write!(s, "#EXTINF:{:.3},\n{}\n", inf.duration, inf.title);
        buf.extend_from_slice(s.as_bytes());
    }
}

/// The sliding window of segments listed in a live media playlist.
///
/// Pushing past the capacity evicts and returns the oldest entry; the
/// caller is responsible for dropping the evicted segment from the store in
/// the same critical section that rewrites the manifest.
#[derive(Debug)]
pub struct SegmentWindow {
    entries: VecDeque<PlaylistInf>,
    capacity: usize,
}

impl SegmentWindow {
    /// Creates a window holding at most `capacity` segments
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity + 1),
            capacity: capacity.max(1),
        }
    }

    /// Appends an entry; returns the evicted oldest entry when full
    pub fn push(&mut self, inf: PlaylistInf) -> Option<PlaylistInf> {
        self.entries.push_back(inf);
        if self.entries.len() > self.capacity {
            self.entries.pop_front()
        } else {
            None
        }
    }

    /// Number of entries currently listed
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no segment has been pushed yet
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &PlaylistInf> {
        self.entries.iter()
    }

    /// Greatest declared duration in the window
    pub fn max_duration(&self) -> f64 {
        self.entries.iter().map(|e| e.duration).fold(0.0, f64::max)
    }

    /// Renders a complete playlist from the window contents.
    ///
    /// `sequence` is the media sequence of the oldest listed segment; the
    /// target duration is recomputed as the ceiling of the longest entry.
    pub fn render(&self, sequence: u64, buf: &mut Vec<u8>) {
        buf.clear();
        let header = Playlist {
            version: 3,
            sequence,
            target_duration: self.max_duration().ceil() as u32,
        };
        header.write_header(buf);
        for inf in self.iter() {
            Playlist::write_inf(buf, inf);
        }
    }
}

/// Renders the master playlist that references the per-track media
/// playlists.
///
/// `prefix` is the directory component the track playlists live under,
/// relative to where the master is served (the stream name). A resolution
/// of zero (unknown) is left out; the audio group is attached only when
/// both tracks exist.
pub fn master_manifest(
    prefix: &str,
    video: Option<(&VideoParams, &str)>,
    audio: Option<&str>,
) -> String {
    let mut s = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");

    match (video, audio) {
        (Some((params, video_name)), audio) => {
            if let Some(audio_name) = audio {
                let _ = write!(
                    s,
                    "#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"audio\",NAME=\"{}\",DEFAULT=YES,AUTOSELECT=YES,URI=\"{}/{}.m3u8\"\n",
                    audio_name, prefix, audio_name
                );
            }
            let _ = write!(s, "#EXT-X-STREAM-INF:BANDWIDTH={}", DEFAULT_BANDWIDTH);
            if params.width > 0 && params.height > 0 {
                let _ = write!(s, ",RESOLUTION={}x{}", params.width, params.height);
            }
            if audio.is_some() {
                s.push_str(",AUDIO=\"audio\"");
            }
            let _ = write!(s, "\n{}/{}.m3u8\n", prefix, video_name);
        }
        (None, Some(audio_name)) => {
            let _ = write!(
                s,
                "#EXT-X-STREAM-INF:BANDWIDTH={}\n{}/{}.m3u8\n",
                DEFAULT_BANDWIDTH, prefix, audio_name
            );
        }
        (None, None) => {}
    }

    s
}

/// The manifest served while no real one exists yet: a looping placeholder
/// with an advancing discontinuity sequence so players keep polling.
pub fn default_manifest(seq: u64, duration: f64) -> String {
    format!(
        "#EXTM3U\n\
         #EXT-X-VERSION:3\n\
         #EXT-X-MEDIA-SEQUENCE:{seq}\n\
         #EXT-X-TARGETDURATION:{target}\n\
         #EXT-X-DISCONTINUITY-SEQUENCE:{seq}\n\
         #EXT-X-DISCONTINUITY\n\
         #EXTINF:{duration:.3},\ndefault.ts",
        seq = seq,
        target = duration.ceil() as u32,
        duration = duration,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use pretty_assertions::assert_eq;

    fn inf(duration: f64, name: &str) -> PlaylistInf {
        PlaylistInf {
            duration,
            title: name.to_string(),
            file_path: format!("live/test/{}", name),
        }
    }

    #[test]
    fn test_header_and_inf_rendering() {
        let mut buf = Vec::new();
        Playlist {
            version: 3,
            sequence: 13,
            target_duration: 2,
        }
        .write_header(&mut buf);
        Playlist::write_inf(&mut buf, &inf(2.0, "video13.ts"));

        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-MEDIA-SEQUENCE:13\n#EXT-X-TARGETDURATION:2\n#EXTINF:2.000,\nvideo13.ts\n"
        );
    }

    #[test]
    fn test_window_eviction_and_render() {
        let mut window = SegmentWindow::new(3);
        assert!(window.push(inf(2.0, "s0.ts")).is_none());
        assert!(window.push(inf(2.5, "s1.ts")).is_none());
        assert!(window.push(inf(2.0, "s2.ts")).is_none());
        let evicted = window.push(inf(2.0, "s3.ts")).unwrap();
        assert_eq!(evicted.title, "s0.ts");
        assert_eq!(window.len(), 3);

        let mut buf = Vec::new();
        window.render(1, &mut buf);
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("#EXT-X-MEDIA-SEQUENCE:1"));
        assert!(text.contains("#EXT-X-TARGETDURATION:3"));
        assert!(!text.contains("s0.ts"));
        assert!(text.contains("s1.ts"));
        assert!(text.contains("s3.ts"));
    }

    #[test]
    fn test_master_manifest_with_audio_group() {
        let params = VideoParams {
            codec: crate::av::CodecId::H264,
            width: 1920,
            height: 1080,
            sps: Bytes::new(),
            pps: Bytes::new(),
            vps: None,
        };
        let text = master_manifest("test", Some((&params, "video")), Some("audio"));
        assert!(text.contains("#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"audio\""));
        assert!(text.contains("URI=\"test/audio.m3u8\""));
        assert!(text.contains("RESOLUTION=1920x1080"));
        assert!(text.contains(",AUDIO=\"audio\"\ntest/video.m3u8"));
    }

    #[test]
    fn test_master_manifest_audio_only() {
        let text = master_manifest("test", None, Some("audio"));
        assert!(text.contains("#EXT-X-STREAM-INF:BANDWIDTH="));
        assert!(text.contains("test/audio.m3u8"));
        assert!(!text.contains("#EXT-X-MEDIA:"));
    }

    #[test]
    fn test_default_manifest() {
        let text = default_manifest(7, 3.88);
        assert!(text.contains("#EXT-X-MEDIA-SEQUENCE:7"));
        assert!(text.contains("#EXT-X-DISCONTINUITY-SEQUENCE:7"));
        assert!(text.contains("#EXT-X-TARGETDURATION:4"));
        assert!(text.ends_with("#EXTINF:3.880,\ndefault.ts"));
    }
}
