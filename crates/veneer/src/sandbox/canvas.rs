use super::Sandbox;
use crate::codec::{ProxyPort, ProxyUrlDescriptor};
use crate::dom::{CanvasContextId, CanvasImageSource, Dom, DomResult, NodeId};
use std::cell::RefCell;
use std::collections::HashMap;
use tracing::debug;
use url::Url;

/// Substitute images handed to `drawImage`, keyed by the page's image,
/// with the proxied address each substitute loads.
#[derive(Debug, Default)]
pub(crate) struct SubstituteCache(RefCell<HashMap<NodeId, (String, NodeId)>>);

impl Sandbox {
    /// `context.drawImage(source, ...args)`.
    ///
    /// An image whose network address points at the proxy host without
    /// being a proxy URL would be drawn from the wrong resource, so the
    /// native call receives a substitute image loading the proxied address.
    /// Every other source (cross-domain images, canvases, contexts) is
    /// passed through as is.
    pub fn draw_image(
        &self,
        dom: &mut Dom,
        ctx: CanvasContextId,
        source: CanvasImageSource,
        args: &[f64],
    ) -> DomResult<()> {
        let source = match source {
            CanvasImageSource::Element(img) if dom.tag_name(img).as_deref() == Some("img") => {
                match self.proxied_image_substitute(dom, img)? {
                    Some(substitute) => CanvasImageSource::Element(substitute),
                    None => source,
                }
            }
            other => other,
        };
        (self.natives.canvas_context_draw_image)(dom, ctx, source, args)
    }

    fn proxied_image_substitute(&self, dom: &mut Dom, img: NodeId) -> DomResult<Option<NodeId>> {
        let src = (self.natives.url_property_getter)(dom, img, "src");
        let Ok(url) = Url::parse(&src) else {
            return Ok(None);
        };
        if self.codec.is_proxy_url(&src) || !self.is_proxy_origin(&url) {
            return Ok(None);
        }

        let descriptor = ProxyUrlDescriptor::new(url, self.session.clone()).with_port(self.port);
        let proxied = self.codec.encode(&descriptor);
        if let Some((loaded, substitute)) = self.substitutes.0.borrow().get(&img) {
            if *loaded == proxied {
                return Ok(Some(*substitute));
            }
        }
        let substitute = (self.natives.create_element)(dom, self.document, "img")?;
        (self.natives.url_property_setter)(dom, substitute, "src", &proxied)?;
        debug!("drawImage: {} substituted by {} loading {}", img, substitute, proxied);
        self.substitutes
            .0
            .borrow_mut()
            .insert(img, (proxied, substitute));
        Ok(Some(substitute))
    }

    fn is_proxy_origin(&self, url: &Url) -> bool {
        [ProxyPort::Primary, ProxyPort::CrossDomain].iter().any(|port| {
            Url::parse(&self.codec.proxy_origin(*port))
                .map(|origin| origin.origin() == url.origin())
                .unwrap_or(false)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::super::tests::setup;
    use super::*;
    use crate::dom::DomException;
    use crate::session_id::SessionId;
    use std::cell::RefCell;

    thread_local! {
        static DRAWN: RefCell<Vec<(CanvasImageSource, Vec<f64>)>> = const { RefCell::new(Vec::new()) };
    }

    fn spy_draw_image(
        dom: &mut Dom,
        ctx: CanvasContextId,
        source: CanvasImageSource,
        args: &[f64],
    ) -> DomResult<()> {
        DRAWN.with(|d| d.borrow_mut().push((source, args.to_vec())));
        dom.draw_image(ctx, source, args)
    }

    fn last_drawn() -> (CanvasImageSource, Vec<f64>) {
        DRAWN.with(|d| d.borrow_mut().pop()).unwrap()
    }

    #[test]
    fn test_draw_image_sources() {
        let (mut dom, mut sandbox) = setup();
        sandbox.native_mut().canvas_context_draw_image = spy_draw_image;
        let doc = sandbox.document();
        let natives_create = sandbox.native().create_element;
        let natives_set_src = sandbox.native().url_property_setter;

        let cross_domain_url = "http://crossdomain.com/image.png";
        let local_url = "http://localhost:2000/";
        let cross_domain_img = natives_create(&mut dom, doc, "img").unwrap();
        let local_img = natives_create(&mut dom, doc, "img").unwrap();
        let constructed_img = natives_create(&mut dom, doc, "img").unwrap();
        natives_set_src(&mut dom, cross_domain_img, "src", cross_domain_url).unwrap();
        natives_set_src(&mut dom, local_img, "src", local_url).unwrap();

        let canvas = sandbox.create_element(&mut dom, "canvas").unwrap();
        let ctx = dom.canvas_context(canvas).unwrap();
        let other_canvas = sandbox.create_element(&mut dom, "canvas").unwrap();
        let other_ctx = dom.canvas_context(other_canvas).unwrap();

        let getter = sandbox.native().url_property_getter;

        sandbox
            .draw_image(&mut dom, ctx, CanvasImageSource::Element(cross_domain_img), &[1.0, 2.0])
            .unwrap();
        let (source, args) = last_drawn();
        assert_eq!(source, CanvasImageSource::Element(cross_domain_img));
        assert_eq!(args, vec![1.0, 2.0]);

        sandbox
            .draw_image(
                &mut dom,
                ctx,
                CanvasImageSource::Element(local_img),
                &[4.0, 3.0, 2.0, 1.0],
            )
            .unwrap();
        let (source, args) = last_drawn();
        let CanvasImageSource::Element(substitute) = source else {
            panic!("expected an image element");
        };
        assert_ne!(substitute, local_img);
        let expected = sandbox.codec().encode(&ProxyUrlDescriptor::new(
            Url::parse(local_url).unwrap(),
            SessionId::new("sessionId").unwrap(),
        ));
        assert_eq!(getter(&dom, substitute, "src"), expected);
        assert_eq!(args, vec![4.0, 3.0, 2.0, 1.0]);

        sandbox
            .draw_image(
                &mut dom,
                ctx,
                CanvasImageSource::Element(constructed_img),
                &[4.0, 3.0],
            )
            .unwrap();
        assert_eq!(last_drawn().0, CanvasImageSource::Element(constructed_img));

        let eight = [1.0, 3.0, 5.0, 7.0, 2.0, 4.0, 6.0, 8.0];
        sandbox
            .draw_image(&mut dom, ctx, CanvasImageSource::Element(other_canvas), &eight)
            .unwrap();
        let (source, args) = last_drawn();
        assert_eq!(source, CanvasImageSource::Element(other_canvas));
        assert_eq!(args, eight.to_vec());

        sandbox
            .draw_image(&mut dom, ctx, CanvasImageSource::Context(other_ctx), &[11.0, 12.0])
            .unwrap();
        assert_eq!(last_drawn().0, CanvasImageSource::Context(other_ctx));
    }

    #[test]
    fn test_draw_image_reuses_substitute_while_src_unchanged() {
        let (mut dom, mut sandbox) = setup();
        sandbox.native_mut().canvas_context_draw_image = spy_draw_image;
        let doc = sandbox.document();
        let create = sandbox.native().create_element;
        let set_src = sandbox.native().url_property_setter;
        let img = create(&mut dom, doc, "img").unwrap();
        set_src(&mut dom, img, "src", "http://localhost:2000/a.png").unwrap();
        let canvas = sandbox.create_element(&mut dom, "canvas").unwrap();
        let ctx = dom.canvas_context(canvas).unwrap();

        let mut substitutes = Vec::new();
        for _ in 0..2 {
            sandbox
                .draw_image(&mut dom, ctx, CanvasImageSource::Element(img), &[0.0, 0.0])
                .unwrap();
            substitutes.push(last_drawn().0);
        }
        assert_eq!(substitutes[0], substitutes[1]);
        assert_ne!(substitutes[0], CanvasImageSource::Element(img));

        set_src(&mut dom, img, "src", "http://localhost:2000/b.png").unwrap();
        sandbox
            .draw_image(&mut dom, ctx, CanvasImageSource::Element(img), &[0.0, 0.0])
            .unwrap();
        let (replaced, _) = last_drawn();
        assert_ne!(replaced, substitutes[0]);
        let CanvasImageSource::Element(replaced) = replaced else {
            panic!("expected an image element");
        };
        assert!(sandbox
            .codec()
            .decode(&dom.reflect_url(replaced, "src"))
            .unwrap()
            .destination()
            .as_str()
            .ends_with("/b.png"));
    }

    #[test]
    fn test_draw_image_native_error_propagates() {
        let (mut dom, sandbox) = setup();
        let canvas = sandbox.create_element(&mut dom, "canvas").unwrap();
        let ctx = dom.canvas_context(canvas).unwrap();
        let img = sandbox.create_element(&mut dom, "img").unwrap();
        assert!(matches!(
            sandbox.draw_image(&mut dom, ctx, CanvasImageSource::Element(img), &[1.0]),
            Err(DomException::TypeError(_))
        ));
    }
}
