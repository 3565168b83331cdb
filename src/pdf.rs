use crate::error::ArkiaError;
use crate::types::{MM_TO_PT, Size};
use flate2::Compression;
use flate2::write::ZlibEncoder;
use lopdf::content::{Content, Operation};
use lopdf::{Document as LoDocument, Object as LoObject, Stream as LoStream, dictionary};
use std::io::Write;

pub const PAGE_WIDTH_MM: f32 = 297.0;
pub const PAGE_HEIGHT_MM: f32 = 210.0;
const IMAGE_RESOURCE: &str = "Im1";
const EPSILON: f64 = 1e-4;

/// Vertical placement of the full report image on each page.
///
/// Every page re-paints the same image; page `k` shifts it up by `k` page
/// heights so the next slice shows through the page frame.
#[derive(Debug, Clone, PartialEq)]
pub struct PaginationPlan {
    pub image_height: f32,
    pub page_height: f32,
    pub offsets: Vec<f32>,
}

impl PaginationPlan {
    pub fn shifted_repaint(image_height: f32, page_height: f32) -> Self {
        let pages = if page_height > 0.0 && image_height.is_finite() {
            let ratio = (f64::from(image_height) - EPSILON) / f64::from(page_height);
            ratio.ceil().max(1.0) as usize
        } else {
            1
        };
        let offsets = (0..pages).map(|k| -(k as f32) * page_height).collect();
        Self {
            image_height,
            page_height,
            offsets,
        }
    }

    pub fn page_count(&self) -> usize {
        self.offsets.len()
    }
}

/// Flate-compressed RGB pixels ready to become an image XObject.
pub struct EmbeddedImage {
    pub width_px: u32,
    pub height_px: u32,
    data: Vec<u8>,
}

impl EmbeddedImage {
    pub fn from_png(png: &[u8]) -> Result<Self, ArkiaError> {
        let decoded = image::load_from_memory_with_format(png, image::ImageFormat::Png)
            .map_err(|e| ArkiaError::Encode(format!("png decode failed: {e}")))?;
        let rgb = decoded.to_rgb8();
        let (width_px, height_px) = rgb.dimensions();
        if width_px == 0 || height_px == 0 {
            return Err(ArkiaError::EmptyLayout);
        }
        Ok(Self {
            width_px,
            height_px,
            data: flate_compress(rgb.as_raw())?,
        })
    }

    /// Height in millimetres once scaled to the full page width.
    pub fn scaled_height_mm(&self) -> f32 {
        self.height_px as f32 * PAGE_WIDTH_MM / self.width_px as f32
    }

    fn to_stream(&self) -> LoStream {
        LoStream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => self.width_px as i64,
                "Height" => self.height_px as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "FlateDecode",
            },
            self.data.clone(),
        )
        .with_compression(false)
    }
}

pub struct PagedPdf {
    pub bytes: Vec<u8>,
    pub plan: PaginationPlan,
    pub image_width_px: u32,
    pub image_height_px: u32,
}

/// Builds a landscape A4 document showing `png` across as many pages as its
/// scaled height needs.
pub fn build_paged_pdf(png: &[u8], title: &str) -> Result<PagedPdf, ArkiaError> {
    let image = EmbeddedImage::from_png(png)?;
    let page = Size::a4_landscape();
    let plan = PaginationPlan::shifted_repaint(image.scaled_height_mm(), PAGE_HEIGHT_MM);

    let mut doc = LoDocument::with_version("1.5");
    let pages_id = doc.new_object_id();
    let image_id = doc.add_object(image.to_stream());
    let resources_id = doc.add_object(dictionary! {
        "XObject" => dictionary! { IMAGE_RESOURCE => image_id },
    });

    let page_w = page.width.to_f32();
    let page_h = page.height.to_f32();
    let draw_w = PAGE_WIDTH_MM * MM_TO_PT;
    let draw_h = plan.image_height * MM_TO_PT;
    let mut kids: Vec<LoObject> = Vec::with_capacity(plan.page_count());
    for offset in &plan.offsets {
        // PDF space is y-up: the image top sits `offset` below the page top.
        let y = page_h - (offset * MM_TO_PT + draw_h);
        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        draw_w.into(),
                        0.into(),
                        0.into(),
                        draw_h.into(),
                        0.into(),
                        y.into(),
                    ],
                ),
                Operation::new("Do", vec![LoObject::Name(IMAGE_RESOURCE.as_bytes().to_vec())]),
                Operation::new("Q", vec![]),
            ],
        };
        let content_id = doc.add_object(LoStream::new(dictionary! {}, content.encode()?));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
        });
        kids.push(page_id.into());
    }

    let pages = dictionary! {
        "Type" => "Pages",
        "Count" => kids.len() as i64,
        "Kids" => kids,
        "MediaBox" => vec![0.into(), 0.into(), page_w.into(), page_h.into()],
    };
    doc.objects.insert(pages_id, LoObject::Dictionary(pages));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    let info_id = doc.add_object(dictionary! {
        "Title" => LoObject::string_literal(title),
        "Producer" => LoObject::string_literal("ARKIA"),
    });
    doc.trailer.set("Root", catalog_id);
    doc.trailer.set("Info", info_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)?;
    Ok(PagedPdf {
        bytes,
        plan,
        image_width_px: image.width_px,
        image_height_px: image.height_px,
    })
}

fn flate_compress(data: &[u8]) -> Result<Vec<u8>, ArkiaError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}
