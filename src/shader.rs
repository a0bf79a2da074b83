//! WGSL sources and the keyword preprocessor.
//!
//! Every pass is a fragment shader drawn over a fullscreen triangle. A
//! pass source is assembled from three pieces: [`COMMON`] (uniform block,
//! sampler, vertex output), one of the two vertex stages, and the pass's
//! fragment body. Optional features are compiled in or out with
//! `#ifdef KEYWORD` blocks, resolved here before the source reaches naga.
//!
//! ```ignore
//! let keywords = KeywordSet::from_iter([Keyword::Bloom, Keyword::Shading]);
//! let source = compose(VertexStage::Base, DISPLAY, keywords)?;
//! validate(&source)?;
//! ```

use std::fmt;

use naga::front::wgsl;
use naga::valid::{Capabilities, ValidationFlags, Validator};

pub const COMMON: &str = include_str!("shaders/common.wgsl");
pub const VERTEX_BASE: &str = include_str!("shaders/vertex_base.wgsl");
pub const VERTEX_BLUR: &str = include_str!("shaders/vertex_blur.wgsl");

pub const COPY: &str = include_str!("shaders/copy.wgsl");
pub const CLEAR: &str = include_str!("shaders/clear.wgsl");
pub const SPLAT: &str = include_str!("shaders/splat.wgsl");
pub const CURL: &str = include_str!("shaders/curl.wgsl");
pub const VORTICITY: &str = include_str!("shaders/vorticity.wgsl");
pub const DIVERGENCE: &str = include_str!("shaders/divergence.wgsl");
pub const PRESSURE: &str = include_str!("shaders/pressure.wgsl");
pub const GRADIENT_SUBTRACT: &str = include_str!("shaders/gradient_subtract.wgsl");
pub const ADVECTION: &str = include_str!("shaders/advection.wgsl");
pub const BLOOM_PREFILTER: &str = include_str!("shaders/bloom_prefilter.wgsl");
pub const BLOOM_BLUR: &str = include_str!("shaders/bloom_blur.wgsl");
pub const BLOOM_FINAL: &str = include_str!("shaders/bloom_final.wgsl");
pub const SUNRAYS_MASK: &str = include_str!("shaders/sunrays_mask.wgsl");
pub const SUNRAYS: &str = include_str!("shaders/sunrays.wgsl");
pub const BLUR: &str = include_str!("shaders/blur.wgsl");
pub const CHECKERBOARD: &str = include_str!("shaders/checkerboard.wgsl");
pub const DISPLAY: &str = include_str!("shaders/display.wgsl");

/// Compile-time feature switch for a shader variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    /// Gradient lighting in the display pass.
    Shading,
    /// Add the bloom texture in the display pass.
    Bloom,
    /// Multiply by the sunrays texture in the display pass.
    Sunrays,
    /// Bilinear filtering done in the shader, for hosts that cannot
    /// filter the field formats.
    ManualFiltering,
}

impl Keyword {
    pub const ALL: [Keyword; 4] = [
        Keyword::Shading,
        Keyword::Bloom,
        Keyword::Sunrays,
        Keyword::ManualFiltering,
    ];

    /// Name used in `#ifdef` directives.
    pub fn name(self) -> &'static str {
        match self {
            Keyword::Shading => "SHADING",
            Keyword::Bloom => "BLOOM",
            Keyword::Sunrays => "SUNRAYS",
            Keyword::ManualFiltering => "MANUAL_FILTERING",
        }
    }

    pub fn from_name(name: &str) -> Option<Keyword> {
        Keyword::ALL.into_iter().find(|k| k.name() == name)
    }

    fn bit(self) -> u8 {
        1 << self as u8
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Unordered set of keywords. Two sets built from the same keywords in a
/// different order compare and hash equal, so they share a compiled
/// program.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeywordSet(u8);

impl KeywordSet {
    pub const EMPTY: KeywordSet = KeywordSet(0);

    #[inline]
    pub fn contains(self, keyword: Keyword) -> bool {
        self.0 & keyword.bit() != 0
    }

    #[inline]
    pub fn insert(&mut self, keyword: Keyword) {
        self.0 |= keyword.bit();
    }

    /// Returns the set with `keyword` added when `enabled` is true.
    #[inline]
    pub fn with_if(mut self, keyword: Keyword, enabled: bool) -> Self {
        if enabled {
            self.insert(keyword);
        }
        self
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(self) -> impl Iterator<Item = Keyword> {
        Keyword::ALL.into_iter().filter(move |k| self.contains(*k))
    }

    /// Every subset of `keywords`, the empty set included.
    pub fn subsets(keywords: &[Keyword]) -> impl Iterator<Item = KeywordSet> + '_ {
        (0u32..1 << keywords.len()).map(move |mask| {
            keywords
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, k)| *k)
                .collect()
        })
    }
}

impl FromIterator<Keyword> for KeywordSet {
    fn from_iter<I: IntoIterator<Item = Keyword>>(iter: I) -> Self {
        let mut set = KeywordSet::EMPTY;
        for keyword in iter {
            set.insert(keyword);
        }
        set
    }
}

impl fmt::Display for KeywordSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("-");
        }
        let mut first = true;
        for keyword in self.iter() {
            if !first {
                f.write_str(" ")?;
            }
            f.write_str(keyword.name())?;
            first = false;
        }
        Ok(())
    }
}

/// Which vertex stage a pass uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexStage {
    /// uv plus the four axis neighbours one texel away.
    Base,
    /// uv plus two taps along the blur direction.
    Blur,
}

impl VertexStage {
    pub fn source(self) -> &'static str {
        match self {
            VertexStage::Base => VERTEX_BASE,
            VertexStage::Blur => VERTEX_BLUR,
        }
    }
}

/// Resolve `#ifdef`, `#ifndef`, `#else` and `#endif` against `keywords`.
///
/// Directive lines are dropped, lines in inactive branches are dropped,
/// everything else is kept verbatim. Blocks nest. Unknown names are
/// treated as undefined.
pub fn preprocess(source: &str, keywords: KeywordSet) -> Result<String, String> {
    // Each entry: (this branch active, enclosing block active, saw #else)
    let mut stack: Vec<(bool, bool, bool)> = Vec::new();
    let mut out = String::with_capacity(source.len());

    for (index, line) in source.lines().enumerate() {
        let line_no = index + 1;
        let trimmed = line.trim_start();
        let active = stack.last().map_or(true, |&(branch, _, _)| branch);

        if let Some(name) = directive(trimmed, "#ifdef") {
            let defined = Keyword::from_name(name).is_some_and(|k| keywords.contains(k));
            stack.push((active && defined, active, false));
        } else if let Some(name) = directive(trimmed, "#ifndef") {
            let defined = Keyword::from_name(name).is_some_and(|k| keywords.contains(k));
            stack.push((active && !defined, active, false));
        } else if trimmed.starts_with("#else") {
            let Some(top) = stack.last_mut() else {
                return Err(format!("line {}: #else without #ifdef", line_no));
            };
            if top.2 {
                return Err(format!("line {}: duplicate #else", line_no));
            }
            top.0 = top.1 && !top.0;
            top.2 = true;
        } else if trimmed.starts_with("#endif") {
            if stack.pop().is_none() {
                return Err(format!("line {}: #endif without #ifdef", line_no));
            }
        } else if trimmed.starts_with('#') {
            return Err(format!("line {}: unknown directive `{}`", line_no, trimmed));
        } else if active {
            out.push_str(line);
            out.push('\n');
        }
    }

    if !stack.is_empty() {
        return Err(format!("{} unterminated #ifdef block(s)", stack.len()));
    }
    Ok(out)
}

fn directive<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(name)?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    rest.split_whitespace().next()
}

/// Full WGSL module for a pass: common block, vertex stage, fragment.
pub fn compose(vertex: VertexStage, fragment: &str, keywords: KeywordSet) -> Result<String, String> {
    let fragment = preprocess(fragment, keywords)?;
    let mut source = String::with_capacity(COMMON.len() + fragment.len() + 512);
    source.push_str(COMMON);
    source.push('\n');
    source.push_str(vertex.source());
    source.push('\n');
    source.push_str(&fragment);
    Ok(source)
}

/// Parse and validate a WGSL module, returning a readable diagnostic.
pub fn validate(source: &str) -> Result<naga::Module, String> {
    let module = wgsl::parse_str(source).map_err(|e| e.emit_to_string(source))?;
    let mut validator = Validator::new(ValidationFlags::all(), Capabilities::all());
    validator
        .validate(&module)
        .map_err(|e| e.emit_to_string(source))?;
    Ok(module)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_set_order_independent() {
        let a: KeywordSet = [Keyword::Bloom, Keyword::Shading].into_iter().collect();
        let b: KeywordSet = [Keyword::Shading, Keyword::Bloom].into_iter().collect();
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
        assert_eq!(a.to_string(), "SHADING BLOOM");
        assert_eq!(KeywordSet::EMPTY.to_string(), "-");
    }

    #[test]
    fn test_keyword_names_round_trip() {
        for keyword in Keyword::ALL {
            assert_eq!(Keyword::from_name(keyword.name()), Some(keyword));
        }
        assert_eq!(Keyword::from_name("FOG"), None);
    }

    #[test]
    fn test_subsets() {
        let all: Vec<KeywordSet> = KeywordSet::subsets(&[Keyword::Bloom, Keyword::Sunrays]).collect();
        assert_eq!(all.len(), 4);
        assert!(all.contains(&KeywordSet::EMPTY));
        assert!(all.contains(&KeywordSet::EMPTY.with_if(Keyword::Bloom, true).with_if(Keyword::Sunrays, true)));
    }

    #[test]
    fn test_preprocess_ifdef_else() {
        let src = "a\n#ifdef BLOOM\nb\n#else\nc\n#endif\nd\n";
        let on = KeywordSet::EMPTY.with_if(Keyword::Bloom, true);
        assert_eq!(preprocess(src, on).unwrap(), "a\nb\nd\n");
        assert_eq!(preprocess(src, KeywordSet::EMPTY).unwrap(), "a\nc\nd\n");
    }

    #[test]
    fn test_preprocess_nested() {
        let src = "#ifdef SUNRAYS\nx\n#ifdef BLOOM\ny\n#endif\n#endif\n#ifndef SHADING\nz\n#endif\n";
        let sunrays = KeywordSet::EMPTY.with_if(Keyword::Sunrays, true);
        assert_eq!(preprocess(src, sunrays).unwrap(), "x\nz\n");

        let both = sunrays.with_if(Keyword::Bloom, true).with_if(Keyword::Shading, true);
        assert_eq!(preprocess(src, both).unwrap(), "x\ny\n");

        // Inner block stays off when the outer one is off.
        let bloom = KeywordSet::EMPTY.with_if(Keyword::Bloom, true);
        assert_eq!(preprocess(src, bloom).unwrap(), "z\n");
    }

    #[test]
    fn test_preprocess_else_inside_inactive_block() {
        let src = "#ifdef BLOOM\n#ifdef SHADING\na\n#else\nb\n#endif\n#endif\n";
        assert_eq!(preprocess(src, KeywordSet::EMPTY).unwrap(), "");
    }

    #[test]
    fn test_preprocess_unbalanced() {
        assert!(preprocess("#ifdef BLOOM\nx\n", KeywordSet::EMPTY).is_err());
        assert!(preprocess("#endif\n", KeywordSet::EMPTY).is_err());
        assert!(preprocess("#else\n", KeywordSet::EMPTY).is_err());
        assert!(preprocess("#ifdef A\n#else\n#else\n#endif\n", KeywordSet::EMPTY).is_err());
        assert!(preprocess("#define X\n", KeywordSet::EMPTY).is_err());
    }

    #[test]
    fn test_compose_and_validate_copy() {
        let source = compose(VertexStage::Base, COPY, KeywordSet::EMPTY).unwrap();
        let module = validate(&source).unwrap();
        assert_eq!(module.entry_points.len(), 2);
    }

    #[test]
    fn test_validate_reports_errors() {
        let err = validate("fn broken( {").unwrap_err();
        assert!(!err.is_empty());
    }
}
