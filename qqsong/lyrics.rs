use crate::api::LyricData;

/// Translated lines attach to the main line closest in time within this
/// window, in seconds.
const TRANSLATION_WINDOW: f64 = 0.1;

#[derive(Clone, Debug, PartialEq)]
pub struct LyricLine {
    /// Seconds from the start of the track; `None` for plain text lyrics.
    pub time: Option<f64>,
    pub text: String,
    pub translation: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Lyrics {
    lines: Vec<LyricLine>,
}

/// Parses `[mm:ss.xx]` tagged lines. A line may carry several tags and
/// yields one entry per tag; untagged or empty lines are dropped.
pub fn parse_lrc(text: &str) -> Vec<(f64, String)> {
    let mut parsed = Vec::new();
    for line in text.lines() {
        let (times, rest) = split_tags(line);
        let rest = rest.trim();
        if times.is_empty() || rest.is_empty() {
            continue;
        }
        for time in times {
            parsed.push((time, rest.to_string()));
        }
    }
    parsed.sort_by(|a, b| a.0.total_cmp(&b.0));
    parsed
}

/// Pulls every time tag out of `line`, returning the tag times and the
/// remaining text. Brackets that are not time tags (e.g. `[ti:...]`) are
/// left in the text.
fn split_tags(line: &str) -> (Vec<f64>, String) {
    let mut times = Vec::new();
    let mut text = String::with_capacity(line.len());
    let mut rest = line;
    while let Some(open) = rest.find('[') {
        text.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find(']') {
            Some(close) => {
                if let Some(time) = parse_tag(&after[..close]) {
                    times.push(time);
                } else {
                    text.push_str(&rest[open..=open + 1 + close]);
                }
                rest = &after[close + 1..];
            }
            None => {
                text.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    text.push_str(rest);
    (times, text)
}

fn parse_tag(tag: &str) -> Option<f64> {
    let (minutes, rest) = tag.split_once(':')?;
    let (seconds, fraction) = rest.split_once('.')?;
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(minutes) || !all_digits(seconds) || !all_digits(fraction) {
        return None;
    }
    let minutes: f64 = minutes.parse().ok()?;
    let seconds: f64 = seconds.parse().ok()?;
    let fraction: f64 = fraction.parse().ok()?;
    Some(minutes * 60.0 + seconds + fraction / 100.0)
}

impl Lyrics {
    pub fn from_data(data: &LyricData) -> Self {
        if data.lyric.trim().is_empty() {
            return Self::default();
        }

        let mut lines: Vec<LyricLine> = parse_lrc(&data.lyric)
            .into_iter()
            .map(|(time, text)| LyricLine {
                time: Some(time),
                text,
                translation: None,
            })
            .collect();

        if lines.is_empty() {
            return Self {
                lines: vec![LyricLine {
                    time: None,
                    text: data.lyric.trim().to_string(),
                    translation: None,
                }],
            };
        }

        for (time, text) in parse_lrc(&data.trans) {
            let target = lines.iter_mut().find(|line| {
                line.time
                    .is_some_and(|t| (t - time).abs() < TRANSLATION_WINDOW)
            });
            if let Some(line) = target {
                line.translation = Some(text);
            }
        }

        Self { lines }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn lines(&self) -> &[LyricLine] {
        &self.lines
    }

    /// Index of the line being sung at `position` seconds.
    pub fn line_at(&self, position: f64) -> Option<usize> {
        self.lines
            .iter()
            .rposition(|line| line.time.is_some_and(|t| position >= t))
    }

    pub fn render(&self, current: Option<usize>) -> Vec<String> {
        if self.lines.is_empty() {
            return vec!["暂无歌词".to_string()];
        }
        self.lines
            .iter()
            .enumerate()
            .map(|(index, line)| {
                let marker = if Some(index) == current { "▶ " } else { "  " };
                match &line.translation {
                    Some(translation) => format!("{marker}{}  ({translation})", line.text),
                    None => format!("{marker}{}", line.text),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(lyric: &str, trans: &str) -> LyricData {
        LyricData {
            lyric: lyric.to_string(),
            trans: trans.to_string(),
        }
    }

    #[test]
    fn repeated_tags_yield_one_line_each_sorted() {
        let parsed = parse_lrc("[00:20.50][00:05.00]副歌\n[00:10.00] 主歌 \n[00:12.00]\nno tag");
        assert_eq!(
            parsed,
            vec![
                (5.0, "副歌".to_string()),
                (10.0, "主歌".to_string()),
                (20.5, "副歌".to_string()),
            ]
        );
    }

    #[test]
    fn metadata_tags_are_not_times() {
        assert!(parse_lrc("[ti:晴天]\n[ar:周杰伦]").is_empty());
        assert_eq!(parse_lrc("[01:02.50]a [b] c"), vec![(62.5, "a [b] c".to_string())]);
    }

    #[test]
    fn translation_attaches_within_window() {
        let lyrics = Lyrics::from_data(&data(
            "[00:01.00]one\n[00:02.00]two",
            "[00:01.05]一\n[00:03.00]三",
        ));
        assert_eq!(lyrics.lines()[0].translation.as_deref(), Some("一"));
        assert_eq!(lyrics.lines()[1].translation, None);
    }

    #[test]
    fn plain_text_is_kept_untimed() {
        let lyrics = Lyrics::from_data(&data("纯音乐，请欣赏", ""));
        assert_eq!(lyrics.lines().len(), 1);
        assert_eq!(lyrics.lines()[0].time, None);
        assert_eq!(lyrics.line_at(30.0), None);
    }

    #[test]
    fn empty_lyrics_render_placeholder() {
        let lyrics = Lyrics::from_data(&data("", "[00:01.00]一"));
        assert!(lyrics.is_empty());
        assert_eq!(lyrics.render(None), vec!["暂无歌词".to_string()]);
    }

    #[test]
    fn line_at_follows_position() {
        let lyrics = Lyrics::from_data(&data("[00:01.00]a\n[00:05.00]b\n[00:09.00]c", ""));
        assert_eq!(lyrics.line_at(0.5), None);
        assert_eq!(lyrics.line_at(1.0), Some(0));
        assert_eq!(lyrics.line_at(7.2), Some(1));
        assert_eq!(lyrics.line_at(120.0), Some(2));

        let rendered = lyrics.render(Some(1));
        assert_eq!(rendered[1], "▶ b");
        assert_eq!(rendered[0], "  a");
    }
}
