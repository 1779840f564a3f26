//! Dynamic rendering attachments.
//!
//! [`RenderingInfoBundle`] owns the attachment infos so the
//! `VkRenderingInfo` returned by [`RenderingInfoBundle::info`] can borrow
//! them for the duration of `vkCmdBeginRendering`.
//!
//! # Example
//!
//! ```no_run
//! use ash::vk;
//! use blackhole_rhi::command::CommandBuffer;
//! use blackhole_rhi::rendering::{color_attachment, depth_attachment, RenderingInfoBundle};
//!
//! # fn example(draw_view: vk::ImageView, depth_view: vk::ImageView, cmd: &CommandBuffer) {
//! let bundle = RenderingInfoBundle::new(
//!     vk::Extent2D { width: 1700, height: 900 },
//!     color_attachment(draw_view, None, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
//!     Some(depth_attachment(depth_view, vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)),
//! );
//! cmd.begin_rendering(&bundle.info());
//! // ... draws ...
//! cmd.end_rendering();
//! # }
//! ```

use ash::vk;

/// Depth clear value. Reverse-Z puts the far plane at 0.
pub const DEPTH_CLEAR: f32 = 0.0;

/// Color attachment that clears to `clear` when given, and loads the
/// existing contents otherwise.
pub fn color_attachment(
    view: vk::ImageView,
    clear: Option<[f32; 4]>,
    layout: vk::ImageLayout,
) -> vk::RenderingAttachmentInfo<'static> {
    let info = vk::RenderingAttachmentInfo::default()
        .image_view(view)
        .image_layout(layout)
        .store_op(vk::AttachmentStoreOp::STORE);

    match clear {
        Some(color) => info
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue { float32: color },
            }),
        None => info.load_op(vk::AttachmentLoadOp::LOAD),
    }
}

/// Depth attachment cleared to [`DEPTH_CLEAR`].
pub fn depth_attachment(
    view: vk::ImageView,
    layout: vk::ImageLayout,
) -> vk::RenderingAttachmentInfo<'static> {
    vk::RenderingAttachmentInfo::default()
        .image_view(view)
        .image_layout(layout)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .clear_value(vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: DEPTH_CLEAR,
                stencil: 0,
            },
        })
}

/// One color attachment, an optional depth attachment and the render area.
pub struct RenderingInfoBundle {
    color_attachments: [vk::RenderingAttachmentInfo<'static>; 1],
    depth_attachment: Option<vk::RenderingAttachmentInfo<'static>>,
    render_area: vk::Rect2D,
}

impl RenderingInfoBundle {
    pub fn new(
        extent: vk::Extent2D,
        color: vk::RenderingAttachmentInfo<'static>,
        depth: Option<vk::RenderingAttachmentInfo<'static>>,
    ) -> Self {
        Self {
            color_attachments: [color],
            depth_attachment: depth,
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            },
        }
    }

    /// `VkRenderingInfo` borrowing this bundle.
    pub fn info(&self) -> vk::RenderingInfo<'_> {
        let info = vk::RenderingInfo::default()
            .render_area(self.render_area)
            .layer_count(1)
            .color_attachments(&self.color_attachments);

        match self.depth_attachment {
            Some(ref depth) => info.depth_attachment(depth),
            None => info,
        }
    }

    #[inline]
    pub fn render_area(&self) -> vk::Rect2D {
        self.render_area
    }
}

#[cfg(test)]
mod tests {
    use ash::vk::Handle;

    use super::*;

    #[test]
    fn test_color_attachment_clear_and_load() {
        let view = vk::ImageView::from_raw(1);
        let cleared = color_attachment(
            view,
            Some([0.0, 0.0, 0.0, 1.0]),
            vk::ImageLayout::GENERAL,
        );
        assert_eq!(cleared.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(unsafe { cleared.clear_value.color.float32 }[3], 1.0);

        let loaded = color_attachment(view, None, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(loaded.load_op, vk::AttachmentLoadOp::LOAD);
        assert_eq!(loaded.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(loaded.image_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
    }

    #[test]
    fn test_depth_attachment_clears_to_far() {
        let depth = depth_attachment(
            vk::ImageView::from_raw(2),
            vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
        );
        assert_eq!(depth.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(unsafe { depth.clear_value.depth_stencil.depth }, DEPTH_CLEAR);
    }

    #[test]
    fn test_bundle_info() {
        let extent = vk::Extent2D {
            width: 640,
            height: 480,
        };
        let bundle = RenderingInfoBundle::new(
            extent,
            color_attachment(vk::ImageView::from_raw(1), None, vk::ImageLayout::GENERAL),
            None,
        );
        let info = bundle.info();
        assert_eq!(info.render_area.extent.width, 640);
        assert_eq!(info.color_attachment_count, 1);
        assert_eq!(info.layer_count, 1);
        assert!(info.p_depth_attachment.is_null());

        let with_depth = RenderingInfoBundle::new(
            extent,
            color_attachment(vk::ImageView::from_raw(1), None, vk::ImageLayout::GENERAL),
            Some(depth_attachment(
                vk::ImageView::from_raw(2),
                vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
            )),
        );
        assert!(!with_depth.info().p_depth_attachment.is_null());
    }
}
