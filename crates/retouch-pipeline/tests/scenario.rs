//! Integration test: paint three zones, run the pipeline against a fake
//! generation service, and check that a failing zone leaves its pixels
//! untouched while the others are applied.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::future::Future;
use std::sync::{Arc, Mutex};

use image::Rgba;
use retouch_pipeline::types::{GrayImage, RgbaImage};
use retouch_pipeline::{
    CancelHandle, EditSession, GenerationFailure, GenerationGateway, GenerationRequest,
    GenerationResult, Mask, Phase, Photo, PipelineConfig, Point, SessionError, Viewport, Zone,
    ZoneColor,
};

const WIDTH: u32 = 120;
const HEIGHT: u32 = 90;

/// Paints each zone edit a flat color keyed on the instruction, never
/// answers the blinds zone, and fails every refinement.
#[derive(Default)]
struct FakeService {
    calls: Mutex<Vec<(String, bool)>>,
}

impl FakeService {
    fn calls(&self) -> Vec<(String, bool)> {
        self.calls.lock().unwrap().clone()
    }
}

impl GenerationGateway for FakeService {
    fn generate(&self, request: GenerationRequest<'_>) -> impl Future<Output = GenerationResult> + Send {
        self.calls
            .lock()
            .unwrap()
            .push((request.instruction.to_string(), request.mask.is_some()));
        let instruction = request.instruction.to_string();
        let input = request.image.clone();
        async move {
            if instruction.contains("REFINEMENT") {
                return Err(GenerationFailure::transport("503 service unavailable"));
            }
            if instruction.contains("close the blinds") {
                std::future::pending::<()>().await;
            }
            let fill = if instruction.contains("remove the lamp") {
                Some(Rgba([200, 10, 10, 255]))
            } else if instruction.contains("brighten") {
                Some(Rgba([10, 200, 10, 255]))
            } else {
                None
            };
            Ok(fill.map_or(input, |px| RgbaImage::from_pixel(WIDTH, HEIGHT, px)))
        }
    }
}

fn paint_band(session: &mut EditSession, color: ZoneColor, y: f64, instruction: &str) {
    let editor = session.editor_mut().unwrap();
    editor.set_color(color);
    editor.set_brush_size(10.0);
    let t = editor.transform();
    editor.pointer_down(t.to_screen(Point::new(5.0, y)));
    editor.pointer_move(t.to_screen(Point::new(60.0, y)));
    editor.pointer_up(t.to_screen(Point::new(115.0, y)));
    editor.set_instruction(color, instruction);
}

#[tokio::test(start_paused = true)]
async fn failing_zone_is_isolated_and_refinement_rolls_back() {
    let mut session = EditSession::new(PipelineConfig::default()).unwrap();
    let gray = RgbaImage::from_pixel(WIDTH, HEIGHT, Rgba([90, 90, 90, 255]));
    session.load_photo(
        Photo::new(gray, PipelineConfig::DEFAULT_DISPLAY_MAX_DIMENSION).unwrap(),
        Viewport::new(800.0, 600.0),
    );
    paint_band(&mut session, ZoneColor::Red, 15.0, "remove the lamp");
    paint_band(&mut session, ZoneColor::Blue, 45.0, "close the blinds");
    paint_band(&mut session, ZoneColor::Green, 75.0, "brighten, add nothing");

    let service = FakeService::default();
    let report = session.submit(&service).await.unwrap();

    let outcomes: Vec<_> = report
        .outcomes
        .iter()
        .map(|o| (o.color, o.is_applied(), o.attempts()))
        .collect();
    assert_eq!(
        outcomes,
        vec![
            (ZoneColor::Red, true, 1),
            (ZoneColor::Blue, false, 2),
            (ZoneColor::Green, true, 1),
        ]
    );
    assert_eq!(report.status_line(), "2 of 3 zones applied (unmodified: blue)");

    let image = session.visible_image().unwrap();
    assert_eq!(image.get_pixel(60, 15).0, [200, 10, 10, 255]);
    assert_eq!(image.get_pixel(60, 45).0, [90, 90, 90, 255]);
    assert_eq!(image.get_pixel(60, 75).0, [10, 200, 10, 255]);
    // Between bands nothing changed.
    assert_eq!(image.get_pixel(60, 30).0, [90, 90, 90, 255]);

    // Base upgrade + red + blue twice + green.
    let calls = service.calls();
    assert_eq!(calls.len(), 5);
    assert!(!calls[0].1);
    assert!(calls[1..].iter().all(|(_, had_mask)| *had_mask));
    assert!(calls[3].0.contains("attempt 2"));

    let timeouts = session
        .diagnostics()
        .calls
        .iter()
        .filter(|c| c.duration == PipelineConfig::DEFAULT_CALL_TIMEOUT)
        .count();
    assert_eq!(timeouts, 2);

    let before = session.visible_image().unwrap().clone();
    let err = session.refine(&service, "make it warmer").await.unwrap_err();
    assert!(matches!(err, SessionError::RefinementFailed(_)));
    assert_eq!(session.phase(), Phase::Done);
    assert_eq!(session.visible_image().unwrap().as_raw(), before.as_raw());

    let refinement = service.calls().pop().unwrap().0;
    assert!(refinement.contains("make it warmer"));
    assert!(refinement.contains("[Zone 1] red: remove the lamp"));
}

#[tokio::test]
async fn nothing_painted_returns_upgraded_photo() {
    let mut session = EditSession::new(PipelineConfig::default()).unwrap();
    let gray = RgbaImage::from_pixel(WIDTH, HEIGHT, Rgba([90, 90, 90, 255]));
    session.load_photo(Photo::new(gray, 1536).unwrap(), Viewport::new(800.0, 600.0));
    // An instruction without strokes is not a zone.
    session
        .editor_mut()
        .unwrap()
        .set_instruction(ZoneColor::Red, "remove the lamp");

    let service = FakeService::default();
    let report = session.submit(&service).await.unwrap();
    assert!(report.outcomes.is_empty());
    assert_eq!(report.status_line(), "0 of 0 zones applied");
    assert_eq!(service.calls().len(), 1);
}

#[tokio::test]
async fn retouch_runs_prepared_zones() {
    let photo = Photo::new(
        RgbaImage::from_pixel(WIDTH, HEIGHT, Rgba([90, 90, 90, 255])),
        1536,
    )
    .unwrap();
    // Left half only.
    let mask = GrayImage::from_fn(WIDTH, HEIGHT, |x, _| image::Luma([if x < WIDTH / 2 { 255 } else { 0 }]));
    let zones = vec![Zone {
        color: ZoneColor::Green,
        instruction: "brighten, add nothing".to_string(),
        mask: Arc::new(Mask::new(mask)),
    }];

    let service = FakeService::default();
    let handle = CancelHandle::new();
    let (report, diagnostics) = retouch_pipeline::retouch(
        &photo,
        zones,
        PipelineConfig::default(),
        &service,
        &mut handle.token(),
    )
    .await
    .unwrap();

    assert_eq!(report.status_line(), "1 of 1 zones applied");
    assert_eq!(report.image.get_pixel(0, 0).0, [10, 200, 10, 255]);
    assert_eq!(report.image.get_pixel(WIDTH - 1, 0).0, [90, 90, 90, 255]);
    assert_eq!(diagnostics.calls.len(), 2);
    assert_eq!(report.summary, "[Zone 1] green: brighten, add nothing...");
}
