//! Pointer coordinate normalization
//!
//! The video is rendered "contain"-fit inside its element, so the visible
//! picture may be letterboxed (bars top and bottom) or pillarboxed (bars
//! left and right). Pointer positions are normalized against the picture,
//! not the element.

use serde::{Deserialize, Serialize};

/// Rectangle in element pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }
}

/// Area of an element actually covered by the video picture
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContentBox {
    rect: Rect,
}

impl ContentBox {
    /// Compute the content box for a video of `video_width` x `video_height`
    /// shown inside `element`
    ///
    /// Without known video dimensions the whole element is used.
    pub fn fit(element: Rect, video_width: u32, video_height: u32) -> Self {
        if video_width == 0 || video_height == 0 || element.width <= 0.0 || element.height <= 0.0
        {
            return Self { rect: element };
        }

        let element_ratio = element.width / element.height;
        let video_ratio = video_width as f64 / video_height as f64;

        let rect = if element_ratio > video_ratio {
            // Pillarbox
            let width = element.height * video_ratio;
            Rect::new(
                element.left + (element.width - width) / 2.0,
                element.top,
                width,
                element.height,
            )
        } else {
            // Letterbox
            let height = element.width / video_ratio;
            Rect::new(
                element.left,
                element.top + (element.height - height) / 2.0,
                element.width,
                height,
            )
        };

        Self { rect }
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    /// Normalize a pointer position to `[0, 1]` over the picture
    ///
    /// Positions over the bars clamp to the nearest edge.
    pub fn normalize(&self, client_x: f64, client_y: f64) -> (f64, f64) {
        let r = self.rect;
        if r.width <= 0.0 || r.height <= 0.0 {
            return (0.0, 0.0);
        }
        let x = ((client_x - r.left) / r.width).clamp(0.0, 1.0);
        let y = ((client_y - r.top) / r.height).clamp(0.0, 1.0);
        (x, y)
    }
}
