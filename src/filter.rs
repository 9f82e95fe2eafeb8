//! Heuristic link filter applied to every discovered candidate.
//!
//! [`is_useful`] is a conjunction of independent rejection rules, so the rules
//! are evaluated in any order and short-circuit on the first hit.

/// Navigation, engagement and legal phrases that never title an article.
/// Matched case-insensitively against the candidate title.
const NAV_KEYWORDS: &[&str] = &[
    "英文", "西班牙语", "移动应用", "apps", "english", "español",
    "导航", "更多", "查看", "浏览", "首页", "主页",
    "comments", "评论", "分享", "收藏", "点赞", "喜欢",
    "下载", "注册", "登录", "关注", "订阅",
    "关于我们", "联系我们", "隐私政策", "服务条款", "版权声明",
    "广告", "推广", "商务合作", "招聘信息", "帮助中心",
    "login", "log in", "sign in", "sign up", "subscribe", "newsletter",
    "privacy policy", "terms of service", "terms of use", "cookie policy",
    "advertisement", "advertise with us", "contact us", "about us",
];

/// URL fragments that mark non-article media pages.
const URL_MARKERS: &[&str] = &["slideshow", "video"];

/// Matched against the lowercased URL.
const REJECTED_PREFIXES: &[&str] = &["javascript:", "mailto:", "#"];

const MIN_PATH_SEGMENTS: usize = 3;
const MIN_TITLE_CHARS: usize = 5;

/// Decide whether `(url, title)` plausibly points at an article.
pub fn is_useful(url: &str, title: &str) -> bool {
    if url.is_empty() || title.is_empty() {
        return false;
    }
    let lowered_url = url.trim_start().to_ascii_lowercase();
    if REJECTED_PREFIXES.iter().any(|p| lowered_url.starts_with(p)) {
        return false;
    }
    if path_segments(url) < MIN_PATH_SEGMENTS {
        return false;
    }
    if title.chars().count() < MIN_TITLE_CHARS {
        return false;
    }

    let lowered = title.to_lowercase();
    if NAV_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        return false;
    }
    if title.trim_end().ends_with('|') {
        return false;
    }
    if URL_MARKERS.iter().any(|m| url.contains(m)) {
        return false;
    }
    true
}

/// Number of `/`-separated segments after the scheme separator.
fn path_segments(url: &str) -> usize {
    let rest = match url.find("://") {
        Some(idx) => &url[idx + 3..],
        None => url,
    };
    rest.split('/').count()
}
