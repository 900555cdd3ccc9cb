use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn qrtrack() -> Command {
    Command::cargo_bin("qrtrack").expect("binary built")
}

#[test]
fn no_arguments_prints_usage() {
    qrtrack()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn wrong_arity_is_rejected() {
    qrtrack()
        .args(["calibrate", "grid.yml", "scene.yml"])
        .assert()
        .failure();
}

#[test]
fn bad_device_index_exits_with_error() {
    let dir = TempDir::new().expect("tempdir");
    qrtrack()
        .args(["capture", "abc"])
        .arg(dir.path().join("out.png"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("error:"));
}

#[test]
fn missing_grid_file_is_reported() {
    let dir = TempDir::new().expect("tempdir");
    let scene = dir.path().join("scene.yml");
    std::fs::write(&scene, "Size: [ 640, 480 ]\n").expect("write scene");

    qrtrack()
        .arg("calibrate")
        .arg(dir.path().join("grid.yml"))
        .arg(&scene)
        .arg(dir.path().join("board.png"))
        .arg(dir.path().join("t.yml"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("grid.yml"));
}

#[test]
fn decode_on_blank_image_prints_nothing() {
    let dir = TempDir::new().expect("tempdir");
    let t = dir.path().join("t.json");
    std::fs::write(
        &t,
        r#"{ "transform_mat": [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]] }"#,
    )
    .expect("write transformation");
    let scene = dir.path().join("scene.json");
    std::fs::write(&scene, r#"{ "Width": 32, "Height": 24 }"#).expect("write scene");
    let img = dir.path().join("blank.png");
    image::RgbImage::new(32, 24).save(&img).expect("write image");

    qrtrack()
        .arg("-q")
        .arg("decode")
        .args([&t, &scene, &img])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

/// Identity transformation, a matching scene and an upright QR code for `payload`.
fn qr_scene(dir: &TempDir, payload: &str) -> [std::path::PathBuf; 3] {
    const MODULE_PX: u32 = 6;
    const QUIET: u32 = 4;
    let code = qrcode::QrCode::new(payload.as_bytes()).expect("encodable payload");
    let modules = code.width() as u32;
    let colors = code.to_colors();
    let side = (modules + 2 * QUIET) * MODULE_PX;
    let img = image::RgbImage::from_fn(side, side, |x, y| {
        let (mx, my) = (x / MODULE_PX, y / MODULE_PX);
        let inside = (QUIET..QUIET + modules).contains(&mx) && (QUIET..QUIET + modules).contains(&my);
        let dark = inside
            && colors[((my - QUIET) * modules + (mx - QUIET)) as usize] == qrcode::Color::Dark;
        if dark {
            image::Rgb([0, 0, 0])
        } else {
            image::Rgb([255, 255, 255])
        }
    });

    let t = dir.path().join("t.json");
    std::fs::write(
        &t,
        r#"{ "transform_mat": [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]] }"#,
    )
    .expect("write transformation");
    let scene = dir.path().join("scene.json");
    std::fs::write(&scene, format!(r#"{{ "Width": {side}, "Height": {side} }}"#)).expect("write scene");
    let frame = dir.path().join("marker.png");
    img.save(&frame).expect("write image");
    [t, scene, frame]
}

fn decoded_angle(stdout: &[u8]) -> f32 {
    let line = String::from_utf8_lossy(stdout);
    let fields: Vec<&str> = line.split_whitespace().collect();
    assert_eq!(fields.len(), 4, "one pose line: {line:?}");
    assert_eq!(fields[0], "7");
    fields[3].parse().expect("angle")
}

#[test]
fn decode_reports_heading_in_configured_convention() {
    let dir = TempDir::new().expect("tempdir");
    let files = qr_scene(&dir, "7");

    let out = qrtrack()
        .arg("-q")
        .arg("decode")
        .args(&files)
        .output()
        .expect("run decode");
    assert!(out.status.success());
    assert!((decoded_angle(&out.stdout) + 90.0).abs() < 2.0);

    let config = dir.path().join("config.yml");
    std::fs::write(&config, "tracking:\n  heading: first_fourth\n").expect("write config");
    let out = qrtrack()
        .arg("-q")
        .arg("decode")
        .args(&files)
        .arg("--config")
        .arg(&config)
        .output()
        .expect("run decode");
    assert!(out.status.success());
    assert!((decoded_angle(&out.stdout).abs() - 180.0).abs() < 2.0);
}
