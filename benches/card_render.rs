//! Card rasterization and frame composition benchmarks.
//! Run: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use reelcard::card::{CardRasterizer, Profile, TextContent};
use reelcard::compositor::compose;
use reelcard::font_assets::FontSet;
use reelcard::layout::compute_layout;
use reelcard::schema::{CanvasConfig, CardStyle};

const POST: &str = "Breaking: a long post that needs several lines of wrapping before it fits \
inside the card, with a second sentence so the profile layout gets exercised too.";

fn bench_card_render(c: &mut Criterion) {
    let fonts = FontSet::builtin();
    let style = CardStyle::default();
    let canvas = CanvasConfig::default();
    let rasterizer = CardRasterizer::new(&fonts, &style);
    let profile = Profile::new("Jane Doe", Some("janedoe"), None);
    let content = TextContent::new(POST, rasterizer.wrap_width(canvas.card_width()), 48)
        .expect("post text is valid");

    let mut group = c.benchmark_group("card_render");
    group.sample_size(50);

    group.bench_function("wrap_and_rasterize_with_profile", |b| {
        b.iter(|| {
            let lines = rasterizer.wrap(&content);
            black_box(
                rasterizer
                    .rasterize(&lines, profile.as_ref(), 48, canvas.card_width(), [0, 0, 0, 255])
                    .expect("rasterize"),
            )
        });
    });

    let lines = rasterizer.wrap(&content);
    let card = rasterizer
        .rasterize(&lines, profile.as_ref(), 48, canvas.card_width(), [0, 0, 0, 255])
        .expect("rasterize");
    let geometry = compute_layout(card.height(), 1920, 1080, &canvas);
    group.bench_function("compose_1080x1920_frame", |b| {
        b.iter(|| black_box(compose(&card, &geometry, &canvas).expect("compose")));
    });

    group.finish();
}

criterion_group!(benches, bench_card_render);
criterion_main!(benches);
