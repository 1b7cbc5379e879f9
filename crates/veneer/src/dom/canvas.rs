//! 2D canvas contexts.
//!
//! Only what bitmap-consuming calls need: a context per canvas element and
//! a log of the draw calls it received, with the network address of each
//! drawn image as the platform would have fetched it.

use super::{Dom, DomException, DomResult, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CanvasContextId(usize);

/// First argument of `drawImage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanvasImageSource {
    /// An `img`, `canvas`, `video` or SVG `image` element.
    Element(NodeId),
    /// Another 2D context (drawn through its canvas).
    Context(CanvasContextId),
}

/// A `drawImage` call that reached the context.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawCall {
    pub source: CanvasImageSource,
    /// Network address of the pixels for image elements.
    pub src: Option<String>,
    pub args: Vec<f64>,
}

#[derive(Debug, Clone)]
pub(super) struct CanvasContext {
    canvas: NodeId,
    calls: Vec<DrawCall>,
}

const DRAWABLE_TAGS: &[&str] = &["img", "canvas", "video", "image"];

impl Dom {
    /// `canvas.getContext('2d')`: one context per canvas.
    pub fn canvas_context(&mut self, canvas: NodeId) -> DomResult<CanvasContextId> {
        if self.tag_name(canvas).as_deref() != Some("canvas") {
            return Err(DomException::TypeError(format!(
                "node {} is not a canvas element",
                canvas
            )));
        }
        if let Some(i) = self.canvases.iter().position(|c| c.canvas == canvas) {
            return Ok(CanvasContextId(i));
        }
        self.canvases.push(CanvasContext {
            canvas,
            calls: Vec::new(),
        });
        Ok(CanvasContextId(self.canvases.len() - 1))
    }

    /// Canvas element a context draws into.
    #[must_use]
    pub fn context_canvas(&self, ctx: CanvasContextId) -> Option<NodeId> {
        self.canvases.get(ctx.0).map(|c| c.canvas)
    }

    /// `context.drawImage(source, ...args)`. Accepts 2, 4 or 8 numeric
    /// arguments, like the platform overloads.
    pub fn draw_image(
        &mut self,
        ctx: CanvasContextId,
        source: CanvasImageSource,
        args: &[f64],
    ) -> DomResult<()> {
        if !matches!(args.len(), 2 | 4 | 8) {
            return Err(DomException::TypeError(format!(
                "drawImage expects 3, 5 or 9 arguments, got {}",
                args.len() + 1
            )));
        }
        let src = match source {
            CanvasImageSource::Element(node) => {
                let tag = self.tag_name(node).unwrap_or_default();
                if !DRAWABLE_TAGS.contains(&tag.as_str()) {
                    return Err(DomException::TypeError(format!(
                        "<{}> is not a drawable image source",
                        tag
                    )));
                }
                match tag.as_str() {
                    "img" | "video" => Some(self.reflect_url(node, "src")),
                    _ => None,
                }
            }
            CanvasImageSource::Context(other) => {
                if self.context_canvas(other).is_none() {
                    return Err(DomException::TypeError("unknown canvas context".to_string()));
                }
                None
            }
        };
        let context = self
            .canvases
            .get_mut(ctx.0)
            .ok_or_else(|| DomException::TypeError("unknown canvas context".to_string()))?;
        context.calls.push(DrawCall {
            source,
            src,
            args: args.to_vec(),
        });
        Ok(())
    }

    /// Draw calls received by a context, oldest first.
    #[must_use]
    pub fn draw_calls(&self, ctx: CanvasContextId) -> &[DrawCall] {
        self.canvases
            .get(ctx.0)
            .map(|c| c.calls.as_slice())
            .unwrap_or_default()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_draw_image_argument_counts() {
        let mut dom = Dom::new();
        let doc = dom.create_html_document("http://localhost:2000/s/https://example.com/");
        let canvas = dom.create_element(doc, "canvas").unwrap();
        let ctx = dom.canvas_context(canvas).unwrap();
        assert_eq!(dom.canvas_context(canvas).unwrap(), ctx);

        let img = dom.create_element(doc, "img").unwrap();
        dom.set_attribute(img, "src", "/a.png").unwrap();
        let source = CanvasImageSource::Element(img);
        dom.draw_image(ctx, source, &[1.0, 2.0]).unwrap();
        assert!(matches!(
            dom.draw_image(ctx, source, &[1.0, 2.0, 3.0]),
            Err(DomException::TypeError(_))
        ));

        let calls = dom.draw_calls(ctx);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].src.as_deref(), Some("http://localhost:2000/a.png"));
    }

    #[test]
    fn test_non_drawable_source_rejected() {
        let mut dom = Dom::new();
        let doc = dom.create_html_document("about:blank");
        let canvas = dom.create_element(doc, "canvas").unwrap();
        let ctx = dom.canvas_context(canvas).unwrap();
        let div = dom.create_element(doc, "div").unwrap();
        assert!(dom
            .draw_image(ctx, CanvasImageSource::Element(div), &[0.0, 0.0])
            .is_err());
        assert!(dom.canvas_context(div).is_err());
    }
}
