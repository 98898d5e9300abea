//! # Similarity Detection
//!
//! Scores a candidate identity against the protected members of one
//! community. Every check walks its inputs in a fixed order and stops at the
//! first qualifying match; it never searches for the globally closest one.

use std::io::Cursor;

use bn_core::{
    AppError, AvatarFormat, AvatarThresholds, CachedAvatar, DetectionResult, ProtectedIdentity,
    Result, UsernameThresholds, ViolationThreshold, ViolationType,
};
use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, ImageError, ImageFormat, RgbaImage};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::compare::compare_and_classify;

/// Which verdict `check_avatar` reports when no comparison reaches HARD.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AvatarVerdict {
    /// The verdict of the final comparison performed, even when an earlier
    /// pairing scored SOFT and the last one scored NONE. Matches the
    /// behaviour deployed communities were tuned against.
    #[default]
    LastComparison,
    /// The most severe verdict across all comparisons.
    Strongest,
}

/// Username-family check: edit distance on usernames first, then exact
/// global-name equality, then exact effective-nickname equality.
///
/// `nickname` falls back to `display_name` when the candidate has none.
pub fn check_username(
    protected: &[ProtectedIdentity],
    username: &str,
    nickname: Option<&str>,
    display_name: &str,
    thresholds: &UsernameThresholds,
) -> DetectionResult {
    for identity in protected {
        let distance = strsim::levenshtein(username, &identity.username);
        if distance <= thresholds.hard as usize {
            return DetectionResult::new(ViolationType::Username, ViolationThreshold::Hard);
        }
        if distance <= thresholds.soft as usize {
            return DetectionResult::new(ViolationType::Username, ViolationThreshold::Soft);
        }
    }

    if protected.iter().any(|p| p.display_name == display_name) {
        return DetectionResult::new(ViolationType::GlobalName, ViolationThreshold::Exact);
    }

    let nickname = nickname.unwrap_or(display_name);
    if protected.iter().any(|p| p.effective_nickname() == nickname) {
        return DetectionResult::new(ViolationType::Nickname, ViolationThreshold::Exact);
    }

    DetectionResult::NONE
}

/// Decoded reference avatars of one community.
#[derive(Debug, Clone, Default)]
pub struct AvatarCorpus {
    pub statics: Vec<RgbaImage>,
    pub animated: Vec<Vec<RgbaImage>>,
}

impl AvatarCorpus {
    /// Decodes cached avatars, keeping their order within each format.
    /// Entries that fail to decode are logged and left out.
    pub fn decode(cached: &[CachedAvatar]) -> Self {
        let mut corpus = Self::default();
        for avatar in cached {
            let decoded = match avatar.format {
                AvatarFormat::Static => decode_static(&avatar.bytes).map(|frame| corpus.statics.push(frame)),
                AvatarFormat::Animated => decode_animated(&avatar.bytes).map(|frames| corpus.animated.push(frames)),
            };
            if let Err(err) = decoded {
                warn!(user_id = %avatar.user_id, error = %err, "skipping undecodable cached avatar");
            }
        }
        corpus
    }

    pub fn is_empty(&self) -> bool {
        self.statics.is_empty() && self.animated.is_empty()
    }
}

/// A candidate avatar: one frame for static images, every frame for animated.
#[derive(Debug, Clone)]
pub struct CandidateAvatar {
    pub format: AvatarFormat,
    pub frames: Vec<RgbaImage>,
}

/// Classifies `bytes` by file signature and decodes it.
pub fn decode_candidate(bytes: &[u8]) -> Result<CandidateAvatar> {
    let format = image::guess_format(bytes)
        .map_err(|_| AppError::UnsupportedFormat("unrecognized image signature".to_string()))?;
    match format {
        ImageFormat::Png => Ok(CandidateAvatar { format: AvatarFormat::Static, frames: vec![decode_static(bytes)?] }),
        ImageFormat::Gif => Ok(CandidateAvatar { format: AvatarFormat::Animated, frames: decode_animated(bytes)? }),
        other => Err(AppError::UnsupportedFormat(format!("{other:?} avatars are not supported"))),
    }
}

/// Compares every candidate frame against every protected static image, then
/// against every frame of every protected animated image. The first HARD
/// verdict is returned immediately; otherwise `verdict` decides.
pub fn check_avatar(
    corpus: &AvatarCorpus,
    candidate: &CandidateAvatar,
    thresholds: &AvatarThresholds,
    verdict: AvatarVerdict,
) -> DetectionResult {
    let references = corpus
        .statics
        .iter()
        .chain(corpus.animated.iter().flatten());

    let mut result = DetectionResult::NONE;
    for reference in references {
        for frame in &candidate.frames {
            let current = compare_and_classify(frame, reference, thresholds);
            if current.is_hard() {
                return current;
            }
            result = match verdict {
                AvatarVerdict::LastComparison => current,
                AvatarVerdict::Strongest if current.threshold > result.threshold => current,
                AvatarVerdict::Strongest => result,
            };
        }
    }
    result
}

/// Decodes and checks raw candidate bytes in one go.
pub fn check_avatar_bytes(
    corpus: &AvatarCorpus,
    bytes: &[u8],
    thresholds: &AvatarThresholds,
    verdict: AvatarVerdict,
) -> Result<DetectionResult> {
    let candidate = decode_candidate(bytes)?;
    Ok(check_avatar(corpus, &candidate, thresholds, verdict))
}

fn decode_static(bytes: &[u8]) -> Result<RgbaImage> {
    let img = image::load_from_memory_with_format(bytes, ImageFormat::Png).map_err(image_error)?;
    Ok(img.to_rgba8())
}

fn decode_animated(bytes: &[u8]) -> Result<Vec<RgbaImage>> {
    let decoder = GifDecoder::new(Cursor::new(bytes)).map_err(image_error)?;
    let frames = decoder.into_frames().collect_frames().map_err(image_error)?;
    Ok(frames.into_iter().map(|frame| frame.into_buffer()).collect())
}

fn image_error(err: ImageError) -> AppError {
    match err {
        ImageError::IoError(io) => AppError::Io(io.to_string()),
        other => AppError::UnsupportedFormat(other.to_string()),
    }
}
