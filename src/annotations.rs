//! Page-normalized annotation geometry.
//!
//! Rects are stored in page space scaled to `0..=1` with the origin at the
//! top-left corner, so an overlay can be laid over any rendered viewport.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

const MIN_EXTENT: f64 = 1e-4;
const NORMALIZED_SLACK: f64 = 1e-6;
/// Largest horizontal gap bridged when merging rects of one text line.
pub const LINE_GAP: f64 = 0.01;
/// Minimum vertical overlap, as a share of the shorter rect, for two rects
/// to count as the same line.
pub const LINE_OVERLAP: f64 = 0.5;

#[derive(Debug, Error, PartialEq)]
pub enum AnnotationError {
    #[error("unknown annotation kind: {0}")]
    UnknownKind(String),
    #[error("color must be #rgb or #rrggbb")]
    BadColor,
    #[error("{0}")]
    BadRect(String),
    #[error("pageWidth and pageHeight must be positive")]
    BadPageSize,
    #[error("{0} annotations need at least one rect inside the page")]
    NoRects(&'static str),
    #[error("note annotations need note text")]
    NoteTextRequired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Highlight,
    Underline,
    Strike,
    Note,
}

impl Kind {
    pub fn parse(s: &str) -> Result<Self, AnnotationError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "highlight" => Ok(Self::Highlight),
            "underline" => Ok(Self::Underline),
            "strike" | "strikeout" => Ok(Self::Strike),
            "note" => Ok(Self::Note),
            other => Err(AnnotationError::UnknownKind(other.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Highlight => "highlight",
            Self::Underline => "underline",
            Self::Strike => "strike",
            Self::Note => "note",
        }
    }

    pub fn default_color(self) -> &'static str {
        match self {
            Self::Highlight => "#ffeb3b",
            Self::Underline => "#2196f3",
            Self::Strike => "#f44336",
            Self::Note => "#ff9800",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl Rect {
    fn right(&self) -> f64 {
        self.x + self.w
    }

    fn bottom(&self) -> f64 {
        self.y + self.h
    }

    fn union(&self, o: &Rect) -> Rect {
        let x = self.x.min(o.x);
        let y = self.y.min(o.y);
        Rect {
            x,
            y,
            w: self.right().max(o.right()) - x,
            h: self.bottom().max(o.bottom()) - y,
        }
    }

    fn same_line(&self, o: &Rect) -> bool {
        let overlap = self.bottom().min(o.bottom()) - self.y.max(o.y);
        if overlap < LINE_OVERLAP * self.h.min(o.h) {
            return false;
        }
        let gap = if self.x <= o.x {
            o.x - self.right()
        } else {
            self.x - o.right()
        };
        gap <= LINE_GAP
    }
}

pub fn validate_color(raw: &str) -> Result<String, AnnotationError> {
    let s = raw.trim().to_ascii_lowercase();
    let hex = s.strip_prefix('#').ok_or(AnnotationError::BadColor)?;
    if (hex.len() == 3 || hex.len() == 6) && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(s)
    } else {
        Err(AnnotationError::BadColor)
    }
}

pub fn parse_rects(v: &Value) -> Result<Vec<Rect>, AnnotationError> {
    let arr = v
        .as_array()
        .ok_or_else(|| AnnotationError::BadRect("rects must be an array".into()))?;
    let mut out = Vec::with_capacity(arr.len());
    for (i, item) in arr.iter().enumerate() {
        let num = |k: &str| {
            item.get(k)
                .and_then(|n| n.as_f64())
                .filter(|n| n.is_finite())
                .ok_or_else(|| AnnotationError::BadRect(format!("rects[{}].{} must be a number", i, k)))
        };
        out.push(Rect {
            x: num("x")?,
            y: num("y")?,
            w: num("w")?,
            h: num("h")?,
        });
    }
    Ok(out)
}

/// Scales page-unit rects into `0..=1` (when a page size is given), flips
/// negative extents, clamps to the page and drops degenerate rects.
pub fn normalize(rects: &[Rect], page: Option<(f64, f64)>) -> Result<Vec<Rect>, AnnotationError> {
    let (sx, sy) = match page {
        Some((w, h)) => {
            if !(w.is_finite() && h.is_finite() && w > 0.0 && h > 0.0) {
                return Err(AnnotationError::BadPageSize);
            }
            (w, h)
        }
        None => (1.0, 1.0),
    };

    let mut out = Vec::with_capacity(rects.len());
    for r in rects {
        let (mut x0, mut x1) = (r.x / sx, (r.x + r.w) / sx);
        let (mut y0, mut y1) = (r.y / sy, (r.y + r.h) / sy);
        if x1 < x0 {
            std::mem::swap(&mut x0, &mut x1);
        }
        if y1 < y0 {
            std::mem::swap(&mut y0, &mut y1);
        }
        if page.is_none() && (x1 > 1.0 + NORMALIZED_SLACK || y1 > 1.0 + NORMALIZED_SLACK) {
            return Err(AnnotationError::BadRect(
                "rects must be normalized to 0..1 when pageWidth/pageHeight are absent".into(),
            ));
        }
        let x0 = x0.clamp(0.0, 1.0);
        let x1 = x1.clamp(0.0, 1.0);
        let y0 = y0.clamp(0.0, 1.0);
        let y1 = y1.clamp(0.0, 1.0);
        if x1 - x0 < MIN_EXTENT || y1 - y0 < MIN_EXTENT {
            continue;
        }
        out.push(Rect {
            x: x0,
            y: y0,
            w: x1 - x0,
            h: y1 - y0,
        });
    }
    Ok(out)
}

/// Collapses the per-glyph-run rects a text selection produces into one
/// rect per visual line, then orders them top-to-bottom, left-to-right.
pub fn merge_line_rects(mut rects: Vec<Rect>) -> Vec<Rect> {
    loop {
        let mut merged_any = false;
        let mut out: Vec<Rect> = Vec::with_capacity(rects.len());
        for r in rects {
            if let Some(m) = out.iter_mut().find(|m| m.same_line(&r)) {
                *m = m.union(&r);
                merged_any = true;
            } else {
                out.push(r);
            }
        }
        rects = out;
        if !merged_any {
            break;
        }
    }
    rects.sort_by(|a, b| a.y.total_cmp(&b.y).then(a.x.total_cmp(&b.x)));
    rects
}

/// Full pipeline for a new annotation's geometry.
pub fn prepare_rects(
    kind: Kind,
    raw: &[Rect],
    page: Option<(f64, f64)>,
) -> Result<Vec<Rect>, AnnotationError> {
    let normalized = normalize(raw, page)?;
    match kind {
        Kind::Note => {
            let anchor = normalized
                .into_iter()
                .next()
                .ok_or(AnnotationError::NoRects("note"))?;
            Ok(vec![anchor])
        }
        _ => {
            let merged = merge_line_rects(normalized);
            if merged.is_empty() {
                return Err(AnnotationError::NoRects(kind.as_str()));
            }
            Ok(merged)
        }
    }
}

pub fn to_viewport(r: &Rect, viewport_w: f64, viewport_h: f64) -> Rect {
    Rect {
        x: r.x * viewport_w,
        y: r.y * viewport_h,
        w: r.w * viewport_w,
        h: r.h * viewport_h,
    }
}
