use std::path::PathBuf;

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use arona::detector::{self, Fingerprint, POSITION_PATCH, Region};
use arona::templates::{TemplateSources, Templates};

const USAGE: &str = "Usage: hash_probe <screenshot.png> <x> <y> [width height] [--out annotated.png]";

fn parse_u32(args: &[String], i: usize, name: &str) -> u32 {
    args[i].parse().unwrap_or_else(|e| {
        eprintln!("invalid {name} {:?}: {e}", args[i]);
        std::process::exit(1);
    })
}

fn main() {
    let mut args: Vec<String> = std::env::args().collect();

    let mut out: Option<PathBuf> = None;
    if let Some(i) = args.iter().position(|a| a == "--out") {
        if i + 1 >= args.len() {
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
        out = Some(PathBuf::from(args.remove(i + 1)));
        args.remove(i);
    }

    if args.len() != 4 && args.len() != 6 {
        eprintln!("{USAGE}");
        std::process::exit(1);
    }

    let screenshot_path = &args[1];
    let screenshot = image::open(screenshot_path)
        .unwrap_or_else(|e| {
            eprintln!("Failed to load {screenshot_path}: {e}");
            std::process::exit(1);
        })
        .to_rgb8();

    let x = parse_u32(&args, 2, "x");
    let y = parse_u32(&args, 3, "y");
    let (width, height) = if args.len() == 6 {
        (parse_u32(&args, 4, "width"), parse_u32(&args, 5, "height"))
    } else {
        (POSITION_PATCH, POSITION_PATCH)
    };
    let region = Region::new(x, y, width, height);

    let Some(fp) = detector::fingerprint(&screenshot, Some(region)) else {
        eprintln!(
            "region {region:?} does not fit in {}x{}",
            screenshot.width(),
            screenshot.height()
        );
        std::process::exit(1);
    };

    println!("Screenshot: {screenshot_path} ({}x{})", screenshot.width(), screenshot.height());
    println!("Region: ({x},{y}) {width}x{height}");
    println!("Fingerprint: {fp}");
    println!("Template name: ({x},{y})<Label>.png");
    println!();

    let sources = TemplateSources::resolve(
        std::env::var("ARONA_ASSETS_DIR").ok().map(PathBuf::from),
        std::env::var("ARONA_TEMPLATE_OVERRIDE_DIR").ok().map(PathBuf::from),
    );
    match Templates::load(&sources) {
        Ok(templates) => report(&screenshot, fp, &templates),
        Err(e) => println!("No templates to compare against: {e:#}"),
    }

    if let Some(path) = out {
        let mut annotated = screenshot.clone();
        draw_hollow_rect_mut(&mut annotated, Rect::at(x as i32, y as i32).of_size(width, height), Rgb([255, 0, 0]));
        match annotated.save(&path) {
            Ok(()) => println!("Annotated copy: {}", path.display()),
            Err(e) => eprintln!("Failed to save {}: {e}", path.display()),
        }
    }
}

fn report(screenshot: &RgbImage, fp: Fingerprint, templates: &Templates) {
    let candidates: Vec<(&str, Fingerprint)> = templates
        .positions()
        .map(|t| (t.key.as_str(), t.fingerprint))
        .chain(templates.notices().map(|t| (t.key.as_str(), t.fingerprint)))
        .collect();

    let exact: Vec<&str> = candidates
        .iter()
        .filter(|(_, candidate)| *candidate == fp)
        .map(|(key, _)| *key)
        .collect();

    if !exact.is_empty() {
        println!("Exact matches: {}", exact.join(", "));
    } else {
        match candidates.iter().min_by_key(|(_, candidate)| fp.distance(*candidate)) {
            Some((key, candidate)) => {
                println!("No exact match, nearest: {key} (distance {})", fp.distance(*candidate))
            }
            None => println!("No templates loaded"),
        }
    }

    // Screens the screenshot is recognized as, each template checked at its own anchor.
    let mut screens: Vec<&str> = templates
        .positions()
        .filter(|t| detector::fingerprint(screenshot, Some(t.region())) == Some(t.fingerprint))
        .map(|t| detector::canonical_label(&t.label))
        .collect();
    screens.sort_unstable();
    screens.dedup();

    if screens.is_empty() {
        println!("Recognized screens: none");
    } else {
        println!("Recognized screens: {}", screens.join(", "));
    }
}
