//! Release metadata from the hosting API, and its classification into
//! checksums, ranked binary candidates and the optional minbuild archive.

use std::collections::HashMap;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use serde::Deserialize;
use tracing::{debug, info};
use crate::compat::{is_suitable, rank};
use crate::error::CatalogError;
use crate::grammar::{ArtifactGrammar, ArtifactName};
use crate::platform::PlatformFingerprint;
use crate::transfer::{
    is_gzip_media, media_type, ContentCategory, TransferEngine, VerifiedSource, CHECKSUM_HEX_LEN,
};

/// Release API host used when the manifest does not name one.
pub const DEFAULT_API_HOST: &str = "https://api.github.com";

/// Suffix of the checksum sibling published next to every trusted asset.
pub const CHECKSUM_SUFFIX: &str = ".sha256sum";

const RELEASE_MEDIA_TYPE: &str = "application/vnd.github.v3+json";

const BINARY_SUFFIXES: [&str; 4] = ["node", "so", "dylib", "dll"];

const BINARY_MEDIA_TYPES: [&str; 4] = [
    "application/octet-stream",
    "application/x-sharedlib",
    "application/x-mach-binary",
    "application/x-msdownload",
];

const MINBUILD_MEDIA_TYPES: [&str; 3] = [
    "application/gzip",
    "application/x-gzip",
    "application/x-compressed-tar",
];

/// Release metadata as served for a single tag.
///
/// Anything the resolver does not look at is ignored.
#[derive(Debug, Default, Deserialize)]
pub struct ReleaseMetadata {
    #[serde(default)]
    pub assets: Option<Vec<RemoteAsset>>,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub prerelease: bool,
}

/// One file attached to a release.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RemoteAsset {
    /// The file name as published.
    pub name: String,
    /// Where the file can be downloaded from.
    #[serde(rename = "browser_download_url")]
    pub download_url: String,
    /// The content type declared at upload time.
    pub content_type: String,
    /// Size in bytes as published. A download must match it exactly.
    pub size: u64,
    /// Upload state; only `uploaded` assets are complete.
    pub state: String,
}

impl RemoteAsset {
    /// Whether the asset is complete and has everything needed to fetch it.
    pub fn is_usable(&self) -> bool {
        self.state == "uploaded"
            && self.size > 0
            && !self.name.is_empty()
            && !self.download_url.is_empty()
    }

    pub fn media_type(&self) -> String {
        media_type(&self.content_type)
    }
}

/// A prebuilt binary that can run on this host and has a published checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub asset: RemoteAsset,
    pub name: ArtifactName,
    pub checksum_url: String,
}

impl Candidate {
    pub fn source(&self) -> VerifiedSource<'_> {
        VerifiedSource {
            url: &self.asset.download_url,
            checksum_url: &self.checksum_url,
            size: self.asset.size,
        }
    }
}

/// The archive of sources a local build needs, published as
/// `v{version}-minbuild.tar.gz`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinbuildArtifact {
    pub asset: RemoteAsset,
    pub checksum_url: String,
}

impl MinbuildArtifact {
    pub fn source(&self) -> VerifiedSource<'_> {
        VerifiedSource {
            url: &self.asset.download_url,
            checksum_url: &self.checksum_url,
            size: self.asset.size,
        }
    }
}

/// What a release offers this host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseResolution {
    pub minbuild: Option<MinbuildArtifact>,
    /// Suitable binaries, most-preferred first.
    pub candidates: Vec<Candidate>,
}

impl ReleaseResolution {
    pub fn best(&self) -> Option<&Candidate> {
        self.candidates.first()
    }
}

/// Everything needed to decide whether a binary asset fits this host.
#[derive(Debug, Clone, Copy)]
pub struct BinaryMatcher<'a> {
    pub grammar: &'a ArtifactGrammar,
    pub fingerprint: &'a PlatformFingerprint,
    pub requires_native_api: bool,
}

pub fn release_url(api_host: &str, repository: &str, version: &str) -> String {
    format!(
        "{}/repos/{}/releases/tags/v{}",
        api_host.trim_end_matches('/'),
        repository,
        version
    )
}

pub fn minbuild_name(version: &str) -> String {
    format!("v{version}-minbuild.tar.gz")
}

/// Parses a release metadata document.
///
/// # Errors
///
/// Fails if the document is not a JSON object, if the release is a draft or
/// a prerelease, or if it carries no assets.
pub fn parse_release(body: &[u8], tag: &str) -> Result<Vec<RemoteAsset>, CatalogError> {
    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|err| CatalogError::Metadata(err.to_string()))?;
    if !value.is_object() {
        return Err(CatalogError::Metadata(
            "release metadata is not a json object".to_string(),
        ));
    }
    let release: ReleaseMetadata =
        serde_json::from_value(value).map_err(|err| CatalogError::Metadata(err.to_string()))?;
    if release.draft {
        return Err(CatalogError::Draft { tag: tag.to_string() });
    }
    if release.prerelease {
        return Err(CatalogError::Prerelease { tag: tag.to_string() });
    }
    match release.assets {
        Some(assets) if !assets.is_empty() => Ok(assets),
        _ => Err(CatalogError::NoAssets { tag: tag.to_string() }),
    }
}

/// Fetches the assets of release `v{version}` of `repository` ("owner/repo").
///
/// # Errors
///
/// Any transfer failure, or any of the conditions [`parse_release`] rejects.
pub fn fetch_release(
    engine: &TransferEngine,
    api_host: &str,
    repository: &str,
    version: &str,
) -> Result<Vec<RemoteAsset>, CatalogError> {
    let url = release_url(api_host, repository, version);
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(RELEASE_MEDIA_TYPE));
    info!(%url, "fetching release metadata");
    let body = engine.fetch(&url, &headers, Some(ContentCategory::Json))?;
    let assets = parse_release(&body, &format!("v{version}"))?;
    debug!(assets = assets.len(), "release metadata received");
    Ok(assets)
}

fn strip_binary_suffix(name: &str) -> Option<&str> {
    BINARY_SUFFIXES
        .iter()
        .find_map(|suffix| name.strip_suffix(*suffix)?.strip_suffix('.'))
}

/// The artifact stem of a binary asset, if its name and content type say it
/// is one.
fn binary_stem<'n>(name: &'n str, media_type: &str) -> Option<&'n str> {
    if let Some(inner) = name.strip_suffix(".gz") {
        if !is_gzip_media(media_type) {
            return None;
        }
        return strip_binary_suffix(inner);
    }
    if !BINARY_MEDIA_TYPES.contains(&media_type) {
        return None;
    }
    strip_binary_suffix(name)
}

/// Sorts a release's assets into checksums, suitable binaries and the
/// minbuild archive.
///
/// Passing no matcher skips binaries altogether. Binaries and the minbuild
/// archive without a checksum sibling are dropped. Candidates come back
/// ranked.
pub fn classify(
    assets: Vec<RemoteAsset>,
    version: &str,
    binaries: Option<BinaryMatcher<'_>>,
) -> ReleaseResolution {
    let minbuild_file = minbuild_name(version);
    let mut checksums: HashMap<String, String> = HashMap::new();
    let mut found: Vec<(RemoteAsset, ArtifactName)> = Vec::new();
    let mut minbuild: Option<RemoteAsset> = None;

    for asset in assets.into_iter().filter(RemoteAsset::is_usable) {
        if let Some(target) = asset.name.strip_suffix(CHECKSUM_SUFFIX) {
            if asset.size == CHECKSUM_HEX_LEN as u64 {
                checksums.insert(target.to_string(), asset.download_url.clone());
            } else {
                debug!(name = %asset.name, size = asset.size, "ignoring checksum of wrong size");
            }
            continue;
        }

        let media = asset.media_type();
        if let Some(matcher) = &binaries {
            if let Some(stem) = binary_stem(&asset.name, &media) {
                match matcher.grammar.parse(stem) {
                    Some(parsed)
                        if is_suitable(&parsed, matcher.fingerprint, matcher.requires_native_api) =>
                    {
                        found.push((asset, parsed));
                    }
                    Some(_) => debug!(name = %asset.name, "binary does not suit this host"),
                    None => debug!(name = %asset.name, "binary is not built for this host"),
                }
                continue;
            }
        }

        if asset.name == minbuild_file && MINBUILD_MEDIA_TYPES.contains(&media.as_str()) {
            minbuild = Some(asset);
        }
    }

    let minbuild = minbuild.and_then(|asset| match checksums.get(&asset.name) {
        Some(url) => Some(MinbuildArtifact {
            checksum_url: url.clone(),
            asset,
        }),
        None => {
            debug!(name = %asset.name, "minbuild archive has no checksum");
            None
        }
    });

    let mut candidates: Vec<Candidate> = found
        .into_iter()
        .filter_map(|(asset, name)| match checksums.get(&asset.name) {
            Some(url) => Some(Candidate {
                checksum_url: url.clone(),
                asset,
                name,
            }),
            None => {
                debug!(name = %asset.name, "binary has no checksum");
                None
            }
        })
        .collect();
    rank(&mut candidates);

    info!(
        candidates = candidates.len(),
        minbuild = minbuild.is_some(),
        "classified release assets"
    );
    ReleaseResolution {
        minbuild,
        candidates,
    }
}
