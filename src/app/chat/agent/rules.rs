//! Ordered query-extraction rules.
//!
//! Each rule pairs a matcher over the turn text with a builder that turns
//! quoted titles, references and product names into search queries. Rules run
//! in table order and their queries are concatenated in that order.

use std::sync::LazyLock;

use regex::Regex;

const LYRIC_KEYWORDS: &[&str] = &["歌词", "lyrics", "歌", "song", "歌曲", "哪句", "最喜欢"];
const ALLUSION_KEYWORDS: &[&str] = &[
    "典故", "引用", "quote", "经典", "文学", "literature", "历史", "history", "形容", "是谁", "出自",
    "来源", "争议", "研究",
];
const BRAND_KEYWORDS: &[&str] = &["品牌", "brand", "perfume brand", "香水品牌", "香氛品牌"];
const PERFUME_KEYWORDS: &[&str] = &["香水", "perfume", "fragrance", "香氛", "具体", "specific perfume"];
const NOTE_KEYWORDS: &[&str] = &[
    "香调", "notes", "fragrance notes", "前调", "中调", "后调", "top notes", "base notes",
];
const PERSON_KEYWORDS: &[&str] = &["是谁", "形容谁", "谁说的", "作者", "writer", "author"];
const POETRY_KEYWORDS: &[&str] = &["诗词", "古诗", "古文", "诗句", "poem", "poetry", "quote", "引用"];
const BOOK_KEYWORDS: &[&str] = &[
    "书", "小说", "作品", "book", "novel", "红楼梦", "三国", "水浒", "西游记",
];

/// Phrases where the user asks outright for a lookup
const EXPLICIT_REQUEST_KEYWORDS: &[&str] = &[
    "搜索", "能否搜索", "帮我查", "查一下", "查找", "搜索一下", "search", "look up", "find", "知道",
    "你知道", "了解", "你了解",
];

const CLASSIC_TITLES: &[&str] = &["红楼梦", "三国", "水浒", "西游记", "聊斋", "金瓶梅", "儒林外史"];
const LITERARY_MARKERS: &[&str] = &["梦", "楼"];
const ALLUSION_CHARS: &str = "蕴藉崖异形容";
const NOT_A_REFERENCE: &[&str] = &["你知道", "你知道的", "你知道吗"];

/// Compiles a built-in pattern; a pattern that fails to compile matches nothing.
pub fn compile(source: &str) -> Option<Regex> {
    match Regex::new(source) {
        Ok(pattern) => Some(pattern),
        Err(error) => {
            tracing::error!(pattern = source, %error, "invalid built-in pattern");
            None
        }
    }
}

static QUOTE_OR_TITLE_MARK: LazyLock<Option<Regex>> =
    LazyLock::new(|| compile(r#"["“”‘’'《》]"#));
static CAPITALIZED_PAIR: LazyLock<Option<Regex>> =
    LazyLock::new(|| compile(r"[A-Z][a-z]+\s+[A-Z]"));

static SONG_TITLE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [r"《([^》]+)》", r#"[“"]([^”"]+)[”"]"#, r"《([^》]+)"]
        .iter()
        .filter_map(|source| compile(source))
        .collect()
});
static SONG_ARTIST: LazyLock<Option<Regex>> =
    LazyLock::new(|| compile(r"([^，。！？\s《》]+)的《"));

static REFERENCE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"《([^》]+)》",
        r#"[“"]([^”"]+)[”"]"#,
        r"[‘']([^’']+)[’']",
        r"([^，。！？\s]{4,})",
    ]
    .iter()
    .filter_map(|source| compile(source))
    .collect()
});

static PRODUCT_NAME_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"[A-Z][a-zA-Z]+(?:\s+[A-Z][a-zA-Z]+)*\s+No\.\s*\d+",
        r"[A-Z][a-zA-Z]+(?:\s+[A-Z][a-zA-Z]+)+",
    ]
    .iter()
    .filter_map(|source| compile(source))
    .collect()
});

/// User text with its lowercase form, shared by every rule
pub struct TurnText<'a> {
    raw: &'a str,
    lowered: String,
}

impl<'a> TurnText<'a> {
    pub fn new(raw: &'a str) -> Self {
        Self {
            raw,
            lowered: raw.to_lowercase(),
        }
    }

    fn mentions(&self, keywords: &[&str]) -> bool {
        keywords.iter().any(|keyword| self.lowered.contains(keyword))
    }

    fn contains(&self, fragment: &str) -> bool {
        self.raw.contains(fragment)
    }
}

pub struct QueryRule {
    pub category: &'static str,
    matches: fn(&TurnText<'_>) -> bool,
    build: fn(&TurnText<'_>) -> Vec<String>,
}

impl QueryRule {
    #[must_use]
    pub fn queries(&self, turn: &TurnText<'_>) -> Vec<String> {
        if (self.matches)(turn) {
            (self.build)(turn)
        } else {
            Vec::new()
        }
    }
}

pub const QUERY_RULES: &[QueryRule] = &[
    QueryRule {
        category: "lyric",
        matches: is_lyric_request,
        build: lyric_queries,
    },
    QueryRule {
        category: "literary",
        matches: is_literary_request,
        build: literary_queries,
    },
    QueryRule {
        category: "product",
        matches: is_product_request,
        build: product_queries,
    },
];

/// Every rule's queries in table order, duplicates included
pub fn extract_candidates(turn_text: &str) -> Vec<String> {
    let turn = TurnText::new(turn_text);
    QUERY_RULES
        .iter()
        .flat_map(|rule| {
            let queries = rule.queries(&turn);
            if !queries.is_empty() {
                tracing::debug!(category = rule.category, ?queries, "query rule matched");
            }
            queries
        })
        .collect()
}

/// True when the user explicitly asks to look something up
pub fn is_explicit_request(turn_text: &str) -> bool {
    TurnText::new(turn_text).mentions(EXPLICIT_REQUEST_KEYWORDS)
}

/// True when the turn names something factual: a song, a quote, a brand or a book
pub fn needs_verification(turn_text: &str) -> bool {
    let turn = TurnText::new(turn_text);
    let categories = [
        LYRIC_KEYWORDS,
        ALLUSION_KEYWORDS,
        BRAND_KEYWORDS,
        PERFUME_KEYWORDS,
        NOTE_KEYWORDS,
        PERSON_KEYWORDS,
        POETRY_KEYWORDS,
        BOOK_KEYWORDS,
    ];
    categories.iter().any(|keywords| turn.mentions(keywords))
        || is_match(&QUOTE_OR_TITLE_MARK, turn_text)
        || is_match(&CAPITALIZED_PAIR, turn_text)
}

fn is_match(pattern: &Option<Regex>, text: &str) -> bool {
    pattern.as_ref().is_some_and(|pattern| pattern.is_match(text))
}

fn captured_groups(pattern: &Regex, text: &str) -> Vec<String> {
    pattern
        .captures_iter(text)
        .filter_map(|captures| captures.get(1))
        .map(|capture| capture.as_str().to_string())
        .collect()
}

fn is_classic_title(text: &str) -> bool {
    CLASSIC_TITLES.iter().any(|title| text.contains(title))
}

fn is_lyric_request(turn: &TurnText<'_>) -> bool {
    let names_literature = turn.mentions(BOOK_KEYWORDS) || turn.mentions(ALLUSION_KEYWORDS);
    (turn.mentions(LYRIC_KEYWORDS) || turn.mentions(EXPLICIT_REQUEST_KEYWORDS)) && !names_literature
}

fn lyric_queries(turn: &TurnText<'_>) -> Vec<String> {
    let artist = SONG_ARTIST
        .as_ref()
        .and_then(|pattern| captured_groups(pattern, turn.raw).into_iter().next());
    SONG_TITLE_PATTERNS
        .iter()
        .filter_map(|pattern| {
            let title = captured_groups(pattern, turn.raw)
                .into_iter()
                .find(|title| title.chars().count() > 1)?;
            if is_classic_title(&title) {
                return None;
            }
            Some(match &artist {
                Some(artist) => format!("{} {} 歌词 lyrics", artist, title),
                None => format!("{} 歌词 lyrics", title),
            })
        })
        .collect()
}

fn is_literary_request(turn: &TurnText<'_>) -> bool {
    turn.mentions(ALLUSION_KEYWORDS)
        || turn.mentions(POETRY_KEYWORDS)
        || turn.mentions(PERSON_KEYWORDS)
        || turn.mentions(BOOK_KEYWORDS)
}

fn literary_queries(turn: &TurnText<'_>) -> Vec<String> {
    REFERENCE_PATTERNS
        .iter()
        .filter_map(|pattern| {
            let reference = captured_groups(pattern, turn.raw).into_iter().find(|candidate| {
                candidate.chars().count() >= 2 && !NOT_A_REFERENCE.contains(&candidate.as_str())
            })?;
            Some(reference_query(turn, &reference))
        })
        .collect()
}

fn reference_query(turn: &TurnText<'_>, reference: &str) -> String {
    let is_literary_work = is_classic_title(reference)
        || LITERARY_MARKERS.iter().any(|marker| reference.contains(marker));
    if is_literary_work || turn.contains("争议") || turn.contains("研究") {
        if turn.contains("争议") {
            format!("{} 争议", reference)
        } else if turn.contains("悼") {
            format!("{} 悼明", reference)
        } else {
            format!("{} 研究 争议", reference)
        }
    } else if reference.chars().any(|character| ALLUSION_CHARS.contains(character)) {
        format!("{} 出处 来源 典故", reference)
    } else if turn.contains("形容") || turn.contains("是谁") {
        format!("{} 形容谁 出处", reference)
    } else {
        format!("{} 出处", reference)
    }
}

fn is_product_request(turn: &TurnText<'_>) -> bool {
    turn.mentions(BRAND_KEYWORDS) || turn.mentions(PERFUME_KEYWORDS)
}

fn product_queries(turn: &TurnText<'_>) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for pattern in PRODUCT_NAME_PATTERNS.iter() {
        for found in pattern.find_iter(turn.raw) {
            let name = found.as_str().trim();
            // "Chanel No" is already covered by "Chanel No. 5"
            if name.chars().count() > 3 && !names.iter().any(|known| known.contains(name)) {
                names.push(name.to_string());
            }
        }
    }
    names
        .into_iter()
        .map(|name| format!("{} perfume fragrance", name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(category: &str) -> &'static QueryRule {
        QUERY_RULES
            .iter()
            .find(|rule| rule.category == category)
            .unwrap()
    }

    #[test]
    fn test_built_in_patterns_compile() {
        assert_eq!(SONG_TITLE_PATTERNS.len(), 3);
        assert_eq!(REFERENCE_PATTERNS.len(), 4);
        assert_eq!(PRODUCT_NAME_PATTERNS.len(), 2);
        assert!(SONG_ARTIST.is_some());
        assert!(QUOTE_OR_TITLE_MARK.is_some());
        assert!(CAPITALIZED_PAIR.is_some());
    }

    #[test]
    fn test_lyric_rule_extracts_titles() {
        let turn = TurnText::new("帮我查一下《隐形人》歌词");
        assert_eq!(
            rule("lyric").queries(&turn),
            vec!["隐形人 歌词 lyrics".to_string(), "隐形人 歌词 lyrics".to_string()]
        );
    }

    #[test]
    fn test_lyric_rule_keeps_artist() {
        let turn = TurnText::new("孙燕姿的《隐形人》哪句歌词最动人");
        assert_eq!(
            rule("lyric").queries(&turn).first().map(String::as_str),
            Some("孙燕姿 隐形人 歌词 lyrics")
        );
    }

    #[test]
    fn test_lyric_rule_yields_to_literature() {
        let turn = TurnText::new("《红楼梦》里最喜欢哪句");
        assert!(rule("lyric").queries(&turn).is_empty());
    }

    #[test]
    fn test_literary_rule_templates() {
        let disputed = TurnText::new("《红楼梦》的结局有什么争议");
        assert_eq!(
            rule("literary").queries(&disputed).first().map(String::as_str),
            Some("红楼梦 争议")
        );

        let person = TurnText::new("“温润如玉”是形容谁的");
        assert_eq!(
            rule("literary").queries(&person).first().map(String::as_str),
            Some("温润如玉 形容谁 出处")
        );

        let allusion = TurnText::new("“蕴藉风流”这个典故");
        assert_eq!(
            rule("literary").queries(&allusion).first().map(String::as_str),
            Some("蕴藉风流 出处 来源 典故")
        );
    }

    #[test]
    fn test_product_rule_extracts_names() {
        let turn = TurnText::new("What is Chanel No. 5 perfume like?");
        assert_eq!(
            rule("product").queries(&turn),
            vec!["Chanel No. 5 perfume fragrance".to_string()]
        );

        let brand = TurnText::new("这个品牌的 Tom Ford Oud Wood 怎么样");
        assert_eq!(
            rule("product").queries(&brand),
            vec!["Tom Ford Oud Wood perfume fragrance".to_string()]
        );
    }

    #[test]
    fn test_candidates_follow_rule_order() {
        let candidates = extract_candidates("孙燕姿的《隐形人》歌词");
        assert_eq!(candidates.first().map(String::as_str), Some("孙燕姿 隐形人 歌词 lyrics"));
        assert!(extract_candidates("I feel tired today").is_empty());
    }

    #[test]
    fn test_verification_and_explicit_request() {
        assert!(needs_verification("I love Tom Ford"));
        assert!(needs_verification("《驾鹤西去》"));
        assert!(needs_verification("推荐一款香水"));
        assert!(!needs_verification("今天有点累"));

        assert!(is_explicit_request("Can you LOOK UP this?"));
        assert!(is_explicit_request("你知道白金缮吗"));
        assert!(!is_explicit_request("I feel tired today"));
    }
}
