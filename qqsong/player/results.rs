use crate::api::{Pagination, SearchPage, Song};
use crate::error::PlayError;

/// The page of search results the player is currently working from.
#[derive(Clone, Debug, Default)]
pub struct ResultSet {
    keyword: String,
    songs: Vec<Song>,
    pagination: Option<Pagination>,
}

impl ResultSet {
    pub fn from_page(keyword: &str, page: SearchPage) -> Self {
        Self {
            keyword: keyword.to_string(),
            songs: page.results,
            pagination: page.pagination,
        }
    }

    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    pub fn is_empty(&self) -> bool {
        self.songs.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<Song, PlayError> {
        self.songs
            .get(index)
            .cloned()
            .ok_or(PlayError::InvalidIndex(index))
    }

    pub fn next_index(&self, current: usize) -> Option<usize> {
        if self.songs.is_empty() {
            return None;
        }
        Some((current + 1) % self.songs.len())
    }

    pub fn previous_index(&self, current: usize) -> Option<usize> {
        let len = self.songs.len();
        if len == 0 {
            return None;
        }
        Some((current % len + len - 1) % len)
    }

    pub fn next_page(&self) -> Option<u32> {
        let pagination = self.pagination.as_ref()?;
        (pagination.has_next && pagination.current_page < pagination.total_pages)
            .then_some(pagination.current_page + 1)
    }

    pub fn previous_page(&self) -> Option<u32> {
        let pagination = self.pagination.as_ref()?;
        (pagination.has_prev && pagination.current_page > 1).then_some(pagination.current_page - 1)
    }

    /// Human readable listing, one song per line, with a header line.
    pub fn render(&self, playing: Option<usize>) -> Vec<String> {
        if self.songs.is_empty() {
            return vec!["未找到相关歌曲".to_string()];
        }
        let mut lines = Vec::with_capacity(self.songs.len() + 1);
        match &self.pagination {
            Some(p) => lines.push(format!(
                "第 {} 页，共 {} 页，找到 {} 首",
                p.current_page, p.total_pages, p.total_results
            )),
            None => lines.push(format!("显示 {} 首歌曲", self.songs.len())),
        }
        for (index, song) in self.songs.iter().enumerate() {
            let marker = if Some(index) == playing { "▶" } else { " " };
            let vip = if song.vip { " [VIP]" } else { "" };
            lines.push(format!(
                "{marker} {index}. {} - {} 《{}》 {}{vip}",
                song.name,
                song.singers,
                song.album,
                format_duration(song.interval)
            ));
        }
        lines
    }
}

pub fn format_duration(seconds: u64) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn songs(n: usize) -> Vec<Song> {
        (0..n)
            .map(|i| Song {
                mid: format!("{i:03}"),
                name: format!("song{i}"),
                singers: "歌手".to_string(),
                vip: i == 1,
                album: "专辑".to_string(),
                album_mid: String::new(),
                interval: 61,
                raw_data: serde_json::Value::Null,
            })
            .collect()
    }

    fn set(n: usize, pagination: Option<Pagination>) -> ResultSet {
        ResultSet::from_page(
            "晴天",
            SearchPage {
                results: songs(n),
                pagination,
            },
        )
    }

    #[test]
    fn next_and_previous_wrap() {
        let results = set(3, None);
        assert_eq!(results.next_index(0), Some(1));
        assert_eq!(results.next_index(2), Some(0));
        assert_eq!(results.previous_index(0), Some(2));
        assert_eq!(results.previous_index(2), Some(1));
        // An index left over from a longer page still lands in range.
        assert_eq!(results.previous_index(7), Some(0));
        assert_eq!(set(0, None).next_index(0), None);
        assert_eq!(set(0, None).previous_index(0), None);
    }

    #[test]
    fn get_out_of_bounds_is_invalid_index() {
        let results = set(2, None);
        assert_eq!(results.get(1).unwrap().mid, "001");
        assert_eq!(results.get(2), Err(PlayError::InvalidIndex(2)));
    }

    #[test]
    fn page_turns_respect_bounds() {
        let first = set(
            10,
            Some(Pagination {
                current_page: 1,
                has_prev: false,
                has_next: true,
                total_pages: 6,
                total_results: 60,
            }),
        );
        assert_eq!(first.next_page(), Some(2));
        assert_eq!(first.previous_page(), None);

        let last = set(
            10,
            Some(Pagination {
                current_page: 6,
                has_prev: true,
                has_next: false,
                total_pages: 6,
                total_results: 60,
            }),
        );
        assert_eq!(last.next_page(), None);
        assert_eq!(last.previous_page(), Some(5));
        assert_eq!(set(3, None).next_page(), None);
    }

    #[test]
    fn render_marks_playing_and_vip() {
        let lines = set(2, None).render(Some(0));
        assert_eq!(lines[0], "显示 2 首歌曲");
        assert_eq!(lines[1], "▶ 0. song0 - 歌手 《专辑》 1:01");
        assert_eq!(lines[2], "  1. song1 - 歌手 《专辑》 1:01 [VIP]");
        assert_eq!(set(0, None).render(None), vec!["未找到相关歌曲".to_string()]);
    }

    #[test]
    fn durations_pad_seconds() {
        assert_eq!(format_duration(0), "0:00");
        assert_eq!(format_duration(269), "4:29");
        assert_eq!(format_duration(3600), "60:00");
    }
}
