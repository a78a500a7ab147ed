//! mapping between container image names / layer digests and store refs
//!
//! refs are plain paths under `refs/heads`, so everything outside
//! `[A-Za-z0-9.-]` is escaped as `_XX` (uppercase hex of the byte). `_`
//! itself is escaped, which keeps the encoding injective. a whole ref
//! component is never empty, `.` or `..`: those are written as `_`, `_2E`
//! and `_2E_2E`, which plain escaping never produces.

use std::fmt;

/// namespace for refs that hold a whole image as fetched by the image copy step
pub const IMAGE_REF_PREFIX: &str = "ociimage/";

/// namespace for refs that hold a single layer's tree
pub const LAYER_REF_PREFIX: &str = "ocilayer/";

const DIGEST_ALGORITHM_PREFIX: &str = "sha256:";

const DEFAULT_TAG: &str = "latest";

/// a container image name split into registry, image path and tag
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ImageName {
    pub registry: Option<String>,
    pub image: String,
    pub tag: String,
}

impl ImageName {
    /// parse `[registry/]image[:tag]`
    ///
    /// the first path segment is a registry only if it contains a `.`;
    /// `localhost:5000/foo` is therefore read as image `localhost` with tag
    /// `5000/foo`. refs only need a consistent encoding, so this is kept.
    pub fn parse(name: &str) -> Self {
        let (registry, rest) = match name.split_once('/') {
            Some((first, rest)) if first.contains('.') => (Some(first.to_string()), rest),
            _ => (None, name),
        };

        let (image, tag) = match rest.rsplit_once(':') {
            Some((image, tag)) => (image, tag),
            None => (rest, DEFAULT_TAG),
        };

        Self {
            registry,
            image: image.to_string(),
            tag: tag.to_string(),
        }
    }

    /// `registry/image:tag`, or `image:tag` without a registry
    pub fn canonical(&self) -> String {
        match &self.registry {
            Some(registry) => format!("{}/{}:{}", registry, self.image, self.tag),
            None => format!("{}:{}", self.image, self.tag),
        }
    }

    /// store ref holding this image
    pub fn to_ref(&self) -> String {
        format!("{}{}", IMAGE_REF_PREFIX, escape_component(&self.canonical()))
    }
}

impl fmt::Display for ImageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// store ref for a parsed image name
pub fn image_ref(name: &ImageName) -> String {
    name.to_ref()
}

/// store ref for an image name given as text
pub fn image_ref_for(name: &str) -> String {
    ImageName::parse(name).to_ref()
}

/// store ref for a layer digest (`sha256:` prefix optional)
pub fn layer_ref(digest: &str) -> String {
    let bare = digest.strip_prefix(DIGEST_ALGORITHM_PREFIX).unwrap_or(digest);
    format!("{}{}", LAYER_REF_PREFIX, escape_component(bare))
}

/// escape a string that forms one whole ref path component
pub fn escape_component(s: &str) -> String {
    match s {
        "" => "_".to_string(),
        "." => "_2E".to_string(),
        ".." => "_2E_2E".to_string(),
        _ => escape(s),
    }
}

/// invert `escape_component`
pub fn unescape_component(s: &str) -> Option<String> {
    match s {
        "_" => Some(String::new()),
        _ => unescape(s),
    }
}

/// escape everything outside `[A-Za-z0-9.-]` as `_XX`
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'.' || byte == b'-' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("_{:02X}", byte));
        }
    }
    out
}

/// invert `escape`; None if the input is not a valid escaped string
pub fn unescape(s: &str) -> Option<String> {
    let mut bytes = Vec::with_capacity(s.len());
    let mut iter = s.bytes();
    while let Some(byte) = iter.next() {
        if byte == b'_' {
            let hi = iter.next()?;
            let lo = iter.next()?;
            let pair = [hi, lo];
            let hex = std::str::from_utf8(&pair).ok()?;
            // lowercase hex never comes out of escape
            if hex.bytes().any(|b| b.is_ascii_lowercase()) {
                return None;
            }
            bytes.push(u8::from_str_radix(hex, 16).ok()?);
        } else if byte.is_ascii_alphanumeric() || byte == b'.' || byte == b'-' {
            bytes.push(byte);
        } else {
            return None;
        }
    }
    String::from_utf8(bytes).ok()
}

/// recover the canonical image name from an image ref
pub fn image_name_from_ref(ref_name: &str) -> Option<String> {
    unescape_component(ref_name.strip_prefix(IMAGE_REF_PREFIX)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_bare_image() {
        let name = ImageName::parse("busybox");
        assert_eq!(name.registry, None);
        assert_eq!(name.image, "busybox");
        assert_eq!(name.tag, "latest");
        assert_eq!(name.canonical(), "busybox:latest");
    }

    #[test]
    fn test_parse_registry_image_tag() {
        let name = ImageName::parse("registry.fedoraproject.org/fedora:40");
        assert_eq!(name.registry.as_deref(), Some("registry.fedoraproject.org"));
        assert_eq!(name.image, "fedora");
        assert_eq!(name.tag, "40");
        assert_eq!(name.canonical(), "registry.fedoraproject.org/fedora:40");
    }

    #[test]
    fn test_parse_path_without_registry() {
        let name = ImageName::parse("library/busybox:1.36");
        assert_eq!(name.registry, None);
        assert_eq!(name.image, "library/busybox");
        assert_eq!(name.tag, "1.36");
    }

    #[test]
    fn test_parse_registry_with_port_and_nested_path() {
        let name = ImageName::parse("quay.io:443/org/app");
        assert_eq!(name.registry.as_deref(), Some("quay.io:443"));
        assert_eq!(name.image, "org/app");
        assert_eq!(name.tag, "latest");
    }

    #[test]
    fn test_parse_dotless_host_is_not_a_registry() {
        let name = ImageName::parse("localhost:5000/foo");
        assert_eq!(name.registry, None);
        assert_eq!(name.image, "localhost");
        assert_eq!(name.tag, "5000/foo");
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape("busybox:latest"), "busybox_3Alatest");
        assert_eq!(escape("a_b"), "a_5Fb");
        assert_eq!(escape("docker.io/x"), "docker.io_2Fx");
        assert_eq!(escape("Ab-1.2"), "Ab-1.2");
        assert_eq!(escape("é"), "_C3_A9");
    }

    #[test]
    fn test_image_ref() {
        assert_eq!(image_ref_for("busybox"), "ociimage/busybox_3Alatest");
        assert_eq!(
            image_ref_for("docker.io/library/busybox:1.36"),
            "ociimage/docker.io_2Flibrary_2Fbusybox_3A1.36"
        );
    }

    #[test]
    fn test_layer_ref_strips_sha256_once() {
        assert_eq!(layer_ref("sha256:abc123"), "ocilayer/abc123");
        assert_eq!(layer_ref("abc123"), "ocilayer/abc123");
        assert_eq!(layer_ref("sha256:sha256:abc"), "ocilayer/sha256_3Aabc");
        assert_eq!(layer_ref("SHA256:abc"), "ocilayer/SHA256_3Aabc");
        assert_eq!(layer_ref("sha512:abc"), "ocilayer/sha512_3Aabc");
    }

    #[test]
    fn test_layer_ref_of_degenerate_digests() {
        assert_eq!(layer_ref(""), "ocilayer/_");
        assert_eq!(layer_ref("sha256:"), "ocilayer/_");
        assert_eq!(layer_ref("."), "ocilayer/_2E");
        assert_eq!(layer_ref(".."), "ocilayer/_2E_2E");
        assert_eq!(layer_ref("sha256:.."), "ocilayer/_2E_2E");
        assert_eq!(layer_ref("..."), "ocilayer/...");

        for digest in ["", ".", "..", "sha256:", "sha256:.", "sha256:.."] {
            assert!(crate::refs::validate_ref_name(&layer_ref(digest)).is_ok());
        }
    }

    #[test]
    fn test_component_escaping_inverts() {
        for s in ["", ".", "..", "a.b", "_", "_2E"] {
            assert_eq!(unescape_component(&escape_component(s)).as_deref(), Some(s));
        }
        assert_ne!(escape_component("."), escape_component("_2E"));
        assert_ne!(escape_component(""), escape_component("_"));
    }

    #[test]
    fn test_layer_and_image_namespaces_disjoint() {
        assert_ne!(layer_ref("busybox:latest"), image_ref_for("busybox:latest"));
    }

    #[test]
    fn test_unescape() {
        assert_eq!(unescape("busybox_3Alatest").as_deref(), Some("busybox:latest"));
        assert_eq!(unescape("_C3_A9").as_deref(), Some("é"));
        assert_eq!(unescape("bad_3"), None);
        assert_eq!(unescape("lower_3a"), None);
        assert_eq!(unescape("slash/"), None);
        assert_eq!(
            image_name_from_ref("ociimage/quay.io_2Ffedora_3A40").as_deref(),
            Some("quay.io/fedora:40")
        );
        assert_eq!(image_name_from_ref("ocilayer/abc"), None);
    }

    proptest! {
        #[test]
        fn prop_distinct_names_distinct_refs(a in ".{0,24}", b in ".{0,24}") {
            let (na, nb) = (ImageName::parse(&a), ImageName::parse(&b));
            if na != nb {
                prop_assert_ne!(na.to_ref(), nb.to_ref());
            }
        }

        #[test]
        fn prop_canonical_reparses(s in ".{0,32}") {
            let name = ImageName::parse(&s);
            prop_assert_eq!(ImageName::parse(&name.canonical()), name);
        }

        #[test]
        fn prop_escape_identity_on_safe_strings(s in "[A-Za-z0-9.-]{0,32}") {
            prop_assert_eq!(escape(&s), s.clone());
            prop_assert_eq!(layer_ref(&s), format!("{}{}", LAYER_REF_PREFIX, s));
        }

        #[test]
        fn prop_unescape_inverts_escape(s in ".{0,32}") {
            prop_assert_eq!(unescape(&escape(&s)), Some(s));
        }

        #[test]
        fn prop_escaped_refs_are_valid_ref_names(s in ".{0,32}") {
            prop_assert!(crate::refs::validate_ref_name(&image_ref_for(&s)).is_ok());
        }

        #[test]
        fn prop_layer_refs_are_valid_ref_names(s in "(sha256:)?[.]{0,3}|.{0,32}") {
            prop_assert!(crate::refs::validate_ref_name(&layer_ref(&s)).is_ok());
        }

        #[test]
        fn prop_component_escaping_is_injective(a in "[._2E]{0,4}|.{0,12}", b in "[._2E]{0,4}|.{0,12}") {
            if a != b {
                prop_assert_ne!(escape_component(&a), escape_component(&b));
            }
            prop_assert_eq!(unescape_component(&escape_component(&a)), Some(a));
        }
    }
}
