//! Normalized cross-correlation template matching over RGB frames.
//!
//! Scores follow the mean-centered normalized correlation coefficient: each
//! channel of the template and of the frame window is centered on its own mean,
//! and the dot product is divided by the product of both norms. Scores lie in
//! `[-1, 1]`; a window or template with zero variance scores 0.
//!
//! Large searches can run coarse-to-fine: both images are box-downsampled, the
//! frame once per sub-cell phase so that copies at any offset line up with the
//! coarse template. Every coarse position scoring near the threshold becomes a
//! seed, and only the neighbourhoods of those seeds are scored exactly at full
//! resolution. Positions never scored are
//! absent from the [`ScoreMap`], so a reported score is always an exact one.

use image::{Rgb, RgbImage};

use crate::core::types::Point;

const CHANNELS: usize = 3;
/// Denominators below this are treated as zero variance.
const FLAT_EPSILON: f64 = 1e-6;
/// Scores this close to 1.0 are rounding noise around a perfect match.
const UNIT_EPSILON: f64 = 1e-9;
/// `positions * template pixels` at or below this is always searched exactly.
const EXACT_WORK_LIMIT: u64 = 40_000_000;
const MAX_PYRAMID_FACTOR: u32 = 8;
/// Smallest coarse template side the pyramid will go down to.
const COARSE_MIN_SIDE: u32 = 12;
/// Coarse seeds are kept down to `threshold - COARSE_SLACK`.
const COARSE_SLACK: f64 = 0.25;
/// The strongest coarse responses are refined even below the seed floor.
const COARSE_KEEP: usize = 8;

/// How the full-resolution score map is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStrategy {
    /// Score every position.
    Exact,
    /// Coarse-to-fine with the given downsampling factor.
    Pyramid { factor: u32 },
    /// Exact for small searches, pyramid for large ones.
    Auto,
}

/// A scored template position (top-left corner).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub x: u32,
    pub y: u32,
    pub score: f64,
}

/// A located template: centroid plus the score used for ranking.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Match {
    pub center: Point,
    pub score: f64,
}

/// Scores for template positions within a frame.
#[derive(Debug, Clone)]
pub struct ScoreMap {
    cols: u32,
    rows: u32,
    template_width: u32,
    template_height: u32,
    scores: Vec<Option<f64>>,
}

impl ScoreMap {
    fn empty(cols: u32, rows: u32, template_width: u32, template_height: u32) -> Self {
        Self {
            cols,
            rows,
            template_width,
            template_height,
            scores: vec![None; cols as usize * rows as usize],
        }
    }

    pub fn template_size(&self) -> (u32, u32) {
        (self.template_width, self.template_height)
    }

    /// Exact score at a top-left position, if it was evaluated.
    pub fn get(&self, x: u32, y: u32) -> Option<f64> {
        if x >= self.cols || y >= self.rows {
            return None;
        }
        self.scores[self.index(x, y)]
    }

    pub fn evaluated(&self) -> usize {
        self.scores.iter().filter(|s| s.is_some()).count()
    }

    /// Highest scoring position; ties resolve to the first in row-major order.
    pub fn best(&self) -> Option<Candidate> {
        let mut best: Option<Candidate> = None;
        for candidate in self.candidates() {
            if best.is_none_or(|b| candidate.score > b.score) {
                best = Some(candidate);
            }
        }
        best
    }

    /// Every evaluated position scoring at least `threshold`, strongest first.
    pub fn above(&self, threshold: f64) -> Vec<Candidate> {
        let mut hits: Vec<Candidate> = self
            .candidates()
            .filter(|c| c.score >= threshold)
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| (a.y, a.x).cmp(&(b.y, b.x)))
        });
        hits
    }

    pub fn center_of(&self, candidate: &Candidate) -> Point {
        Point::new(
            (candidate.x + self.template_width / 2) as i32,
            (candidate.y + self.template_height / 2) as i32,
        )
    }

    fn candidates(&self) -> impl Iterator<Item = Candidate> + '_ {
        self.scores.iter().enumerate().filter_map(|(i, s)| {
            s.map(|score| Candidate {
                x: (i % self.cols as usize) as u32,
                y: (i / self.cols as usize) as u32,
                score,
            })
        })
    }

    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.cols as usize + x as usize
    }

    fn set(&mut self, x: u32, y: u32, score: f64) {
        let i = self.index(x, y);
        self.scores[i] = Some(score);
    }

    fn is_set(&self, x: u32, y: u32) -> bool {
        self.scores[self.index(x, y)].is_some()
    }
}

/// Score `template` against `frame`.
///
/// Returns `None` when the template is empty or larger than the frame in
/// either dimension. `threshold` only steers which coarse seeds a pyramid
/// search refines.
pub fn match_template(
    frame: &RgbImage,
    template: &RgbImage,
    strategy: SearchStrategy,
    threshold: f64,
) -> Option<ScoreMap> {
    let (fw, fh) = frame.dimensions();
    let (tw, th) = template.dimensions();
    if tw == 0 || th == 0 || tw > fw || th > fh {
        return None;
    }

    let factor = match strategy {
        SearchStrategy::Exact => 1,
        SearchStrategy::Pyramid { factor } => factor.max(1),
        SearchStrategy::Auto => auto_factor(fw, fh, tw, th),
    };
    if factor > 1
        && let Some(map) = pyramid_search(frame, template, factor, threshold)
    {
        return Some(map);
    }
    Some(exact_search(frame, template))
}

/// Best match scoring at least `threshold`.
pub fn find_best(
    frame: &RgbImage,
    template: &RgbImage,
    threshold: f64,
    strategy: SearchStrategy,
) -> Option<Match> {
    let map = match_template(frame, template, strategy, threshold)?;
    let best = map.best()?;
    if best.score < threshold {
        return None;
    }
    Some(Match {
        center: map.center_of(&best),
        score: best.score,
    })
}

/// All matches scoring at least `threshold`, strongest first, with overlapping
/// detections of the same object suppressed.
pub fn find_all(
    frame: &RgbImage,
    template: &RgbImage,
    threshold: f64,
    strategy: SearchStrategy,
) -> Vec<Match> {
    let Some(map) = match_template(frame, template, strategy, threshold) else {
        return Vec::new();
    };
    let (tw, th) = map.template_size();
    let hits: Vec<Match> = map
        .above(threshold)
        .iter()
        .map(|c| Match {
            center: map.center_of(c),
            score: c.score,
        })
        .collect();
    suppress_overlaps(&hits, dedup_radius(tw, th))
}

/// Minimum distance between two reported centers for a template size.
pub fn dedup_radius(template_width: u32, template_height: u32) -> f64 {
    f64::from(template_width.max(template_height)) / 2.0
}

/// Greedy suppression: walk `matches` in order and keep each one that lies at
/// least `min_distance` away from every match already kept.
pub fn suppress_overlaps(matches: &[Match], min_distance: f64) -> Vec<Match> {
    let mut kept: Vec<Match> = Vec::new();
    for m in matches {
        if kept
            .iter()
            .all(|k| k.center.distance(m.center) >= min_distance)
        {
            kept.push(*m);
        }
    }
    kept
}

fn auto_factor(fw: u32, fh: u32, tw: u32, th: u32) -> u32 {
    let positions = u64::from(fw - tw + 1) * u64::from(fh - th + 1);
    let work = positions * u64::from(tw) * u64::from(th);
    if work <= EXACT_WORK_LIMIT {
        return 1;
    }
    let mut factor = 1;
    while factor < MAX_PYRAMID_FACTOR && tw.min(th) / (factor * 2) >= COARSE_MIN_SIDE {
        factor *= 2;
    }
    factor
}

fn exact_search(frame: &RgbImage, template: &RgbImage) -> ScoreMap {
    let (fw, fh) = frame.dimensions();
    let (tw, th) = template.dimensions();
    let cols = fw - tw + 1;
    let rows = fh - th + 1;
    let integral = Integral::new(frame);
    let prepared = PreparedTemplate::new(template);
    let mut map = ScoreMap::empty(cols, rows, tw, th);
    for y in 0..rows {
        for x in 0..cols {
            map.set(x, y, score_at(frame, &integral, &prepared, x, y));
        }
    }
    map
}

fn pyramid_search(
    frame: &RgbImage,
    template: &RgbImage,
    factor: u32,
    threshold: f64,
) -> Option<ScoreMap> {
    let coarse_template = downsample(template, factor, 0, 0);
    let (ctw, cth) = coarse_template.dimensions();
    if ctw < 2 || cth < 2 {
        return None;
    }

    // A copy whose origin is not a multiple of `factor` only lines up with the
    // coarse template on the frame downsampled from the matching phase.
    let floor = threshold - COARSE_SLACK;
    let mut seeds: Vec<(u32, u32)> = Vec::new();
    let mut strongest: Vec<(f64, u32, u32)> = Vec::new();
    for py in 0..factor {
        for px in 0..factor {
            let coarse_frame = downsample(frame, factor, px, py);
            let (cfw, cfh) = coarse_frame.dimensions();
            if ctw > cfw || cth > cfh {
                continue;
            }
            let coarse = exact_search(&coarse_frame, &coarse_template);
            for c in coarse.candidates() {
                let origin = (c.x * factor + px, c.y * factor + py);
                if c.score >= floor {
                    seeds.push(origin);
                }
                strongest.push((c.score, origin.0, origin.1));
            }
        }
    }
    if strongest.is_empty() {
        return None;
    }
    strongest.sort_by(|a, b| b.0.total_cmp(&a.0));
    seeds.extend(strongest.iter().take(COARSE_KEEP).map(|&(_, x, y)| (x, y)));

    let (fw, fh) = frame.dimensions();
    let (tw, th) = template.dimensions();
    let cols = fw - tw + 1;
    let rows = fh - th + 1;
    let integral = Integral::new(frame);
    let prepared = PreparedTemplate::new(template);
    let mut map = ScoreMap::empty(cols, rows, tw, th);

    for (sx, sy) in seeds {
        let x0 = sx.saturating_sub(1).min(cols - 1);
        let y0 = sy.saturating_sub(1).min(rows - 1);
        let x1 = (sx + 1).min(cols - 1);
        let y1 = (sy + 1).min(rows - 1);
        for y in y0..=y1 {
            for x in x0..=x1 {
                if !map.is_set(x, y) {
                    map.set(x, y, score_at(frame, &integral, &prepared, x, y));
                }
            }
        }
    }
    Some(map)
}

/// Box-average `image` over `factor` x `factor` cells starting at
/// (`offset_x`, `offset_y`); partial edge cells are dropped.
fn downsample(image: &RgbImage, factor: u32, offset_x: u32, offset_y: u32) -> RgbImage {
    let (w, h) = image.dimensions();
    let cw = w.saturating_sub(offset_x) / factor;
    let ch = h.saturating_sub(offset_y) / factor;
    let area = factor * factor;
    RgbImage::from_fn(cw, ch, |cx, cy| {
        let mut acc = [0u32; CHANNELS];
        for dy in 0..factor {
            for dx in 0..factor {
                let px = image.get_pixel(
                    offset_x + cx * factor + dx,
                    offset_y + cy * factor + dy,
                );
                for (slot, value) in acc.iter_mut().zip(px.0) {
                    *slot += u32::from(value);
                }
            }
        }
        Rgb(acc.map(|sum| ((sum + area / 2) / area) as u8))
    })
}

/// Per-channel summed-area tables of values and squared values.
struct Integral {
    stride: usize,
    sums: Vec<[u64; CHANNELS]>,
    squares: Vec<[u64; CHANNELS]>,
}

impl Integral {
    fn new(image: &RgbImage) -> Self {
        let (w, h) = image.dimensions();
        let stride = w as usize + 1;
        let len = stride * (h as usize + 1);
        let mut sums = vec![[0u64; CHANNELS]; len];
        let mut squares = vec![[0u64; CHANNELS]; len];
        for y in 0..h as usize {
            let mut row_sum = [0u64; CHANNELS];
            let mut row_sq = [0u64; CHANNELS];
            for x in 0..w as usize {
                let px = image.get_pixel(x as u32, y as u32);
                for c in 0..CHANNELS {
                    let v = u64::from(px.0[c]);
                    row_sum[c] += v;
                    row_sq[c] += v * v;
                }
                let above = y * stride + x + 1;
                let here = (y + 1) * stride + x + 1;
                for c in 0..CHANNELS {
                    sums[here][c] = sums[above][c] + row_sum[c];
                    squares[here][c] = squares[above][c] + row_sq[c];
                }
            }
        }
        Self {
            stride,
            sums,
            squares,
        }
    }

    fn window(&self, x: u32, y: u32, w: u32, h: u32) -> ([u64; CHANNELS], [u64; CHANNELS]) {
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + w as usize, y0 + h as usize);
        let a = y0 * self.stride + x0;
        let b = y0 * self.stride + x1;
        let c = y1 * self.stride + x0;
        let d = y1 * self.stride + x1;
        let mut sum = [0u64; CHANNELS];
        let mut sq = [0u64; CHANNELS];
        for ch in 0..CHANNELS {
            sum[ch] = self.sums[d][ch] + self.sums[a][ch] - self.sums[b][ch] - self.sums[c][ch];
            sq[ch] = self.squares[d][ch] + self.squares[a][ch]
                - self.squares[b][ch]
                - self.squares[c][ch];
        }
        (sum, sq)
    }
}

/// Template pixels centered on their per-channel means, row-major RGB.
struct PreparedTemplate {
    width: u32,
    height: u32,
    centered: Vec<f64>,
    norm_sq: f64,
}

impl PreparedTemplate {
    fn new(template: &RgbImage) -> Self {
        let (width, height) = template.dimensions();
        let raw = template.as_raw();
        let n = f64::from(width) * f64::from(height);
        let mut means = [0f64; CHANNELS];
        for px in raw.chunks_exact(CHANNELS) {
            for c in 0..CHANNELS {
                means[c] += f64::from(px[c]);
            }
        }
        for mean in &mut means {
            *mean /= n;
        }
        let centered: Vec<f64> = raw
            .iter()
            .enumerate()
            .map(|(i, v)| f64::from(*v) - means[i % CHANNELS])
            .collect();
        let norm_sq = centered.iter().map(|v| v * v).sum();
        Self {
            width,
            height,
            centered,
            norm_sq,
        }
    }
}

fn score_at(
    frame: &RgbImage,
    integral: &Integral,
    template: &PreparedTemplate,
    x: u32,
    y: u32,
) -> f64 {
    let (tw, th) = (template.width, template.height);
    let n = f64::from(tw) * f64::from(th);
    let (sum, sq) = integral.window(x, y, tw, th);
    let mut window_var = 0.0;
    for c in 0..CHANNELS {
        let s = sum[c] as f64;
        window_var += sq[c] as f64 - s * s / n;
    }
    let denom = (window_var.max(0.0) * template.norm_sq).sqrt();
    if denom < FLAT_EPSILON {
        return 0.0;
    }

    // Centered template values sum to zero per channel, so the window mean
    // drops out of the numerator.
    let raw = frame.as_raw();
    let frame_stride = frame.width() as usize * CHANNELS;
    let row_len = tw as usize * CHANNELS;
    let mut num = 0.0;
    for ty in 0..th as usize {
        let start = (y as usize + ty) * frame_stride + x as usize * CHANNELS;
        let window_row = &raw[start..start + row_len];
        let template_row = &template.centered[ty * row_len..(ty + 1) * row_len];
        for (t, v) in template_row.iter().zip(window_row) {
            num += t * f64::from(*v);
        }
    }
    normalize_score(num / denom)
}

fn normalize_score(score: f64) -> f64 {
    let clamped = score.clamp(-1.0, 1.0);
    if 1.0 - clamped < UNIT_EPSILON {
        1.0
    } else {
        clamped
    }
}
