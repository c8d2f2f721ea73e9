
//! The blend modes a layer can use, and the per-pixel compositing math.
//!
//! The file stores blend modes as loosely-typed four-character keys.
//! They resolve into a closed enum with an explicit default arm, so an
//! unrecognized key from a future Photoshop version composites like
//! `norm` instead of failing at runtime.

/// How a layer's color combines with the accumulated color beneath it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendMode {
    /// Group-only mode; composites like `Normal` because a group
    /// has no pixels of its own.
    PassThrough,
    Normal,
    /// Stochastic scattering is not reproduced; composites like `Normal`.
    Dissolve,

    Darken,
    Multiply,
    ColorBurn,
    LinearBurn,
    DarkerColor,

    Lighten,
    Screen,
    ColorDodge,
    LinearDodge,
    LighterColor,

    Overlay,
    SoftLight,
    HardLight,
    VividLight,
    LinearLight,
    PinLight,
    HardMix,

    Difference,
    Exclusion,
    Subtract,
    Divide,

    Hue,
    Saturation,
    Color,
    Luminosity,
}

impl Default for BlendMode {
    fn default() -> Self { BlendMode::Normal }
}

impl BlendMode {

    /// Resolve a four-character key from the file.
    /// Every key this crate does not recognize maps to `Normal`.
    pub fn from_key(key: [u8; 4]) -> Self {
        match &key {
            b"pass" => BlendMode::PassThrough,
            b"norm" => BlendMode::Normal,
            b"diss" => BlendMode::Dissolve,

            b"dark" => BlendMode::Darken,
            b"mul " => BlendMode::Multiply,
            b"idiv" => BlendMode::ColorBurn,
            b"lbrn" => BlendMode::LinearBurn,
            b"dkCl" => BlendMode::DarkerColor,

            b"lite" => BlendMode::Lighten,
            b"scrn" => BlendMode::Screen,
            b"div " => BlendMode::ColorDodge,
            b"lddg" => BlendMode::LinearDodge,
            b"lgCl" => BlendMode::LighterColor,

            b"over" => BlendMode::Overlay,
            b"sLit" => BlendMode::SoftLight,
            b"hLit" => BlendMode::HardLight,
            b"vLit" => BlendMode::VividLight,
            b"lLit" => BlendMode::LinearLight,
            b"pLit" => BlendMode::PinLight,
            b"hMix" => BlendMode::HardMix,

            b"diff" => BlendMode::Difference,
            b"smud" => BlendMode::Exclusion,
            b"fsub" => BlendMode::Subtract,
            b"fdiv" => BlendMode::Divide,

            b"hue " => BlendMode::Hue,
            b"sat " => BlendMode::Saturation,
            b"colr" => BlendMode::Color,
            b"lum " => BlendMode::Luminosity,

            _ => BlendMode::Normal,
        }
    }

    /// Whether this mode operates on whole pixels through their
    /// luminosity and saturation instead of on independent channels.
    pub fn is_non_separable(self) -> bool {
        matches!(
            self,
            BlendMode::Hue | BlendMode::Saturation | BlendMode::Color | BlendMode::Luminosity
                | BlendMode::DarkerColor | BlendMode::LighterColor
        )
    }

    /// Combine a backdrop color with a source color, both with
    /// channels in `0.0 ..= 1.0`. Alpha is handled by the caller.
    pub fn blend(self, backdrop: [f32; 3], source: [f32; 3]) -> [f32; 3] {
        match self {
            BlendMode::Hue => set_lum(set_sat(source, sat(backdrop)), lum(backdrop)),
            BlendMode::Saturation => set_lum(set_sat(backdrop, sat(source)), lum(backdrop)),
            BlendMode::Color => set_lum(source, lum(backdrop)),
            BlendMode::Luminosity => set_lum(backdrop, lum(source)),

            BlendMode::DarkerColor =>
                if lum(source) < lum(backdrop) { source } else { backdrop },

            BlendMode::LighterColor =>
                if lum(source) > lum(backdrop) { source } else { backdrop },

            separable => [
                separable.blend_channel(backdrop[0], source[0]),
                separable.blend_channel(backdrop[1], source[1]),
                separable.blend_channel(backdrop[2], source[2]),
            ],
        }
    }

    fn blend_channel(self, backdrop: f32, source: f32) -> f32 {
        let (b, s) = (backdrop, source);

        match self {
            BlendMode::PassThrough | BlendMode::Normal | BlendMode::Dissolve => s,

            BlendMode::Darken => b.min(s),
            BlendMode::Multiply => b * s,
            BlendMode::ColorBurn => color_burn(b, s),
            BlendMode::LinearBurn => (b + s - 1.0).max(0.0),

            BlendMode::Lighten => b.max(s),
            BlendMode::Screen => b + s - b * s,
            BlendMode::ColorDodge => color_dodge(b, s),
            BlendMode::LinearDodge => (b + s).min(1.0),

            BlendMode::Overlay => hard_light(s, b),
            BlendMode::SoftLight => soft_light(b, s),
            BlendMode::HardLight => hard_light(b, s),

            BlendMode::VividLight =>
                if s <= 0.5 { color_burn(b, 2.0 * s) }
                else { color_dodge(b, 2.0 * s - 1.0) },

            BlendMode::LinearLight => (b + 2.0 * s - 1.0).clamp(0.0, 1.0),

            BlendMode::PinLight =>
                if s <= 0.5 { b.min(2.0 * s) }
                else { b.max(2.0 * s - 1.0) },

            BlendMode::HardMix => if b + s >= 1.0 { 1.0 } else { 0.0 },

            BlendMode::Difference => (b - s).abs(),
            BlendMode::Exclusion => b + s - 2.0 * b * s,
            BlendMode::Subtract => (b - s).max(0.0),
            BlendMode::Divide => if s <= 0.0 { 1.0 } else { (b / s).min(1.0) },

            BlendMode::Hue | BlendMode::Saturation | BlendMode::Color | BlendMode::Luminosity
                | BlendMode::DarkerColor | BlendMode::LighterColor =>
                unreachable!("non-separable modes are dispatched in blend"),
        }
    }
}


/// Paint one source pixel over one backdrop pixel.
/// `opacity` scales the source coverage on top of its own alpha.
///
/// Straight-alpha arithmetic: the blended color only applies where the
/// backdrop actually has coverage, a transparent backdrop contributes
/// no blend term and the source shows through unchanged.
pub fn composite_pixel(mode: BlendMode, backdrop: [u8; 4], source: [u8; 4], opacity: u8) -> [u8; 4] {
    // fully transparent sources leave the backdrop untouched
    let source_alpha = (source[3] as f32 / 255.0) * (opacity as f32 / 255.0);
    if source_alpha <= 0.0 {
        return backdrop;
    }

    // opaque normal pixels replace the backdrop outright
    if mode == BlendMode::Normal && source[3] == 255 && opacity == 255 {
        return source;
    }

    let backdrop_alpha = backdrop[3] as f32 / 255.0;

    let b = [
        backdrop[0] as f32 / 255.0,
        backdrop[1] as f32 / 255.0,
        backdrop[2] as f32 / 255.0,
    ];

    let s = [
        source[0] as f32 / 255.0,
        source[1] as f32 / 255.0,
        source[2] as f32 / 255.0,
    ];

    let blended = mode.blend(b, s);

    let out_alpha = source_alpha + backdrop_alpha * (1.0 - source_alpha);
    if out_alpha <= 0.0 {
        return [0, 0, 0, 0];
    }

    let mut out = [0_u8; 4];
    for channel in 0 .. 3 {
        let mixed = (1.0 - backdrop_alpha) * s[channel] + backdrop_alpha * blended[channel];

        let value = (mixed * source_alpha + b[channel] * backdrop_alpha * (1.0 - source_alpha))
            / out_alpha;

        out[channel] = (value * 255.0 + 0.5).clamp(0.0, 255.0) as u8;
    }

    out[3] = (out_alpha * 255.0 + 0.5).clamp(0.0, 255.0) as u8;
    out
}


fn color_dodge(b: f32, s: f32) -> f32 {
    if b <= 0.0 { 0.0 }
    else if s >= 1.0 { 1.0 }
    else { (b / (1.0 - s)).min(1.0) }
}

fn color_burn(b: f32, s: f32) -> f32 {
    if b >= 1.0 { 1.0 }
    else if s <= 0.0 { 0.0 }
    else { 1.0 - ((1.0 - b) / s).min(1.0) }
}

fn hard_light(b: f32, s: f32) -> f32 {
    if s <= 0.5 { 2.0 * s * b }
    else { 1.0 - 2.0 * (1.0 - s) * (1.0 - b) }
}

fn soft_light(b: f32, s: f32) -> f32 {
    if s <= 0.5 {
        b - (1.0 - 2.0 * s) * b * (1.0 - b)
    }
    else {
        let d = if b <= 0.25 { ((16.0 * b - 12.0) * b + 4.0) * b } else { b.sqrt() };
        b + (2.0 * s - 1.0) * (d - b)
    }
}


fn lum(color: [f32; 3]) -> f32 {
    0.3 * color[0] + 0.59 * color[1] + 0.11 * color[2]
}

fn sat(color: [f32; 3]) -> f32 {
    let max = color[0].max(color[1]).max(color[2]);
    let min = color[0].min(color[1]).min(color[2]);
    max - min
}

/// Shift a color to the target luminosity, then clamp it back
/// into the displayable range without changing that luminosity.
fn set_lum(color: [f32; 3], target: f32) -> [f32; 3] {
    let shift = target - lum(color);
    clip_color([color[0] + shift, color[1] + shift, color[2] + shift])
}

fn clip_color(color: [f32; 3]) -> [f32; 3] {
    let l = lum(color);
    let min = color[0].min(color[1]).min(color[2]);
    let max = color[0].max(color[1]).max(color[2]);

    let mut clipped = color;

    if min < 0.0 {
        for channel in &mut clipped {
            *channel = l + (*channel - l) * l / (l - min);
        }
    }

    if max > 1.0 {
        for channel in &mut clipped {
            *channel = l + (*channel - l) * (1.0 - l) / (max - l);
        }
    }

    clipped
}

/// Rescale the channel spread of a color to the target saturation,
/// keeping the order of its minimum, middle and maximum channel.
fn set_sat(color: [f32; 3], target: f32) -> [f32; 3] {
    let mut indices = [0, 1, 2];
    indices.sort_by(|&a, &b| color[a].partial_cmp(&color[b]).expect("finite channel values"));
    let [min_index, mid_index, max_index] = indices;

    let mut result = [0.0; 3];

    if color[max_index] > color[min_index] {
        result[mid_index] = (color[mid_index] - color[min_index]) * target
            / (color[max_index] - color[min_index]);
        result[max_index] = target;
    }

    result
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unknown_keys_fall_back_to_normal() {
        assert_eq!(BlendMode::from_key(*b"Xyz9"), BlendMode::Normal);
        assert_eq!(BlendMode::from_key([0xff; 4]), BlendMode::Normal);
        assert_eq!(BlendMode::from_key(*b"norm"), BlendMode::Normal);
    }

    #[test]
    fn unknown_key_composites_identically_to_normal() {
        let backdrop = [10, 200, 30, 180];
        let source = [90, 14, 250, 77];

        for opacity in [0_u8, 1, 128, 254, 255] {
            assert_eq!(
                composite_pixel(BlendMode::from_key(*b"????"), backdrop, source, opacity),
                composite_pixel(BlendMode::Normal, backdrop, source, opacity),
            );
        }
    }

    #[test]
    fn known_keys_resolve() {
        assert_eq!(BlendMode::from_key(*b"mul "), BlendMode::Multiply);
        assert_eq!(BlendMode::from_key(*b"scrn"), BlendMode::Screen);
        assert_eq!(BlendMode::from_key(*b"lum "), BlendMode::Luminosity);
        assert_eq!(BlendMode::from_key(*b"pass"), BlendMode::PassThrough);
    }

    #[test]
    fn multiply_darkens_and_screen_lightens() {
        let backdrop = [100, 100, 100, 255];
        let source = [100, 100, 100, 255];

        let multiplied = composite_pixel(BlendMode::Multiply, backdrop, source, 255);
        assert!(multiplied[0] < 100);

        let screened = composite_pixel(BlendMode::Screen, backdrop, source, 255);
        assert!(screened[0] > 100);
    }

    #[test]
    fn blending_over_transparency_shows_the_source() {
        // with no backdrop coverage there is nothing to multiply against
        let source = [40, 80, 120, 255];
        let result = composite_pixel(BlendMode::Multiply, [0, 0, 0, 0], source, 255);
        assert_eq!(result, source);
    }

    #[test]
    fn opacity_scales_coverage() {
        let over_nothing = composite_pixel(BlendMode::Normal, [0, 0, 0, 0], [255, 255, 255, 255], 128);
        assert_eq!(over_nothing[3], 128);

        let unchanged = composite_pixel(BlendMode::Normal, [7, 8, 9, 200], [1, 2, 3, 255], 0);
        assert_eq!(unchanged, [7, 8, 9, 200]);
    }

    #[test]
    fn alpha_accumulates_under_the_source() {
        // alpha_out = src + dst * (1 - src)
        let result = composite_pixel(BlendMode::Normal, [0, 0, 0, 128], [255, 0, 0, 128], 255);
        let expected = 128.0 / 255.0 + (128.0 / 255.0) * (1.0 - 128.0 / 255.0);
        assert_eq!(result[3], (expected * 255.0 + 0.5) as u8);
    }

    #[test]
    fn luminosity_takes_the_source_brightness() {
        let backdrop = [1.0, 0.0, 0.0];
        let source = [0.5, 0.5, 0.5];

        let blended = BlendMode::Luminosity.blend(backdrop, source);
        assert!((lum(blended) - lum(source)).abs() < 1e-4);
    }

    #[test]
    fn hue_preserves_backdrop_luminosity() {
        let backdrop = [0.2, 0.6, 0.4];
        let source = [0.9, 0.1, 0.3];

        let blended = BlendMode::Hue.blend(backdrop, source);
        assert!((lum(blended) - lum(backdrop)).abs() < 1e-4);
    }

    #[test]
    fn set_sat_handles_flat_colors() {
        // a gray has no channel spread, the result collapses to zero
        assert_eq!(set_sat([0.5, 0.5, 0.5], 0.8), [0.0, 0.0, 0.0]);
    }
}
