use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

use crate::record::{nsid, Embed, FeedPost};

/// `#` or fullwidth `＃` at the start or after whitespace. the token ends at
/// whitespace or another hash and may not end in punctuation.
static HASHTAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\s)[#＃]([^\s#＃]*[^\s#＃\p{P}])").unwrap());

const MAX_TAG_CHARS: usize = 64;

/// Raw hashtag tokens found in free text, in order of appearance, unfolded.
pub fn find_hashtags(text: &str) -> impl Iterator<Item = &str> {
    HASHTAG
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .filter(|t| is_tag(t))
}

fn is_tag(t: &str) -> bool {
    !t.is_empty() && t.chars().count() <= MAX_TAG_CHARS && !t.chars().all(|c| c.is_ascii_digit())
}

/// Lowercase with `İ` mapped to a plain `i` (the default mapping adds a
/// combining dot).
pub fn fold_simple(tag: &str) -> String {
    let mut out = String::with_capacity(tag.len());
    for c in tag.chars() {
        match c {
            'İ' => out.push('i'),
            c => out.extend(c.to_lowercase()),
        }
    }
    out
}

/// Turkish and Azerbaijani casing: dotless `I` lowers to `ı`, dotted `İ` to `i`.
pub fn fold_turkish(tag: &str) -> String {
    let mut out = String::with_capacity(tag.len());
    for c in tag.chars() {
        match c {
            'I' => out.push('ı'),
            'İ' => out.push('i'),
            c => out.extend(c.to_lowercase()),
        }
    }
    out
}

/// Whether any declared language's primary subtag is Turkish.
pub fn is_turkish(langs: &[String]) -> bool {
    langs.iter().any(|l| {
        l.split(['-', '_'])
            .next()
            .is_some_and(|primary| primary.eq_ignore_ascii_case("tr"))
    })
}

/// Normalized hashtags for a post.
///
/// Sources: hashtags in the text, tag facets, the out-of-band `tags` list,
/// and hashtags written into image alt texts. For Turkish posts every tag is
/// emitted under both the Turkish and the simple folding, so searches with
/// either casing convention find it.
pub fn extract_hashtags(post: &FeedPost) -> BTreeSet<String> {
    let turkish = is_turkish(&post.langs);
    let mut raw: Vec<&str> = find_hashtags(&post.text).collect();

    for facet in &post.facets {
        for feature in &facet.features {
            if feature.kind != nsid::FACET_TAG {
                continue;
            }
            if let Some(tag) = feature.tag.as_deref() {
                raw.push(tag.trim_start_matches(['#', '＃']));
            }
        }
    }

    raw.extend(post.tags.iter().map(|t| t.trim_start_matches(['#', '＃'])));

    if let Some(embed) = &post.embed {
        for alt in alt_texts(embed) {
            raw.extend(find_hashtags(alt));
        }
    }

    let mut out = BTreeSet::new();
    for tag in raw.into_iter().map(str::trim).filter(|t| is_tag(t)) {
        if turkish {
            out.insert(fold_turkish(tag));
        }
        out.insert(fold_simple(tag));
    }
    out
}

fn alt_texts(embed: &Embed) -> impl Iterator<Item = &str> {
    embed
        .images
        .iter()
        .chain(embed.media.iter().flat_map(|m| m.images.iter()))
        .map(|i| i.alt.as_str())
}
