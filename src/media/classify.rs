//! Image/video classification.
//!
//! Every call site that needs to know "is this a video" goes through
//! [`is_video`], which weighs its signals by kind rather than by position:
//!
//! 1. An explicit flag (`Flag`, or `FlagText` reading `true`/`false`) decides.
//! 2. Otherwise the first declared name (`Name`) with a recognized media
//!    extension decides.
//! 3. Otherwise any heuristic string (`Hint`, e.g. a URL) that has a video
//!    extension or mentions `video` marks the item as a video.
//! 4. Otherwise it is an image.

/// Extensions treated as video, shared by classification and MIME selection.
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mov", "avi", "mkv", "webm", "m4v", "3gp", "flv", "wmv",
];

/// Extensions treated as still images.
pub const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "heic", "heif", "webp", "bmp", "tif", "tiff", "dng",
];

/// One piece of evidence about an item's media kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoSignal<'a> {
    /// A declared boolean flag.
    Flag(bool),
    /// A declared flag that arrived as text; only `true`/`false` count.
    FlagText(&'a str),
    /// A filename or object path whose extension is authoritative.
    Name(&'a str),
    /// A URL or other loosely related string.
    Hint(&'a str),
}

/// Lowercased extension of `name`, ignoring any `?query` suffix.
pub fn extension(name: &str) -> Option<String> {
    let normalized = name.split('?').next().unwrap_or(name);
    let file = normalized.rsplit('/').next().unwrap_or(normalized);
    let (stem, ext) = file.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

fn has_video_extension(name: &str) -> bool {
    extension(name).is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.as_str()))
}

fn has_image_extension(name: &str) -> bool {
    extension(name).is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// Whether `name` has an extension this tool uploads.
pub fn is_media_file(name: &str) -> bool {
    has_video_extension(name) || has_image_extension(name)
}

/// Classify an item from its signals. See the module docs for precedence.
pub fn is_video(signals: &[VideoSignal<'_>]) -> bool {
    for signal in signals {
        match signal {
            VideoSignal::Flag(flag) => return *flag,
            VideoSignal::FlagText(text) => {
                if text.eq_ignore_ascii_case("true") {
                    return true;
                }
                if text.eq_ignore_ascii_case("false") {
                    return false;
                }
            }
            _ => {}
        }
    }

    for signal in signals {
        if let VideoSignal::Name(name) = signal {
            if has_video_extension(name) {
                return true;
            }
            if has_image_extension(name) {
                return false;
            }
        }
    }

    signals.iter().any(|signal| match signal {
        VideoSignal::Hint(hint) => {
            has_video_extension(hint) || hint.to_ascii_lowercase().contains("video")
        }
        _ => false,
    })
}

/// MIME type sent with an upload part.
pub fn mime_type(filename: &str) -> &'static str {
    if has_video_extension(filename) {
        "video/*"
    } else {
        "image/*"
    }
}
