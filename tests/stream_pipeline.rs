// 该文件是 Yatra （行程车辆识别） 项目的一部分。
// tests/stream_pipeline.rs - 流式检测流程测试
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{
  io::Cursor,
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
};

use image::{ImageFormat, Rgb, RgbImage};
use yatra::{
  ErrorKind, PipelineError,
  frame::{ChannelOrder, ColorFrame},
  input::{DecodeError, FrameSource, StreamGeometry},
  media::{MediaKind, MediaOutcome, MediaPayload, process_file, process_media},
  model::{DetectItem, DetectResult, Detector, InferenceError, LabelVocabulary},
  output::{Draw, EncodeError, FrameSink},
  tally::CountTally,
  task::detect_stream,
};

// 启动外部工具的测试串行执行
static TOOL_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

fn tool_lock() -> std::sync::MutexGuard<'static, ()> {
  TOOL_LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

const WIDTH: u32 = 32;
const HEIGHT: u32 = 24;

// 场景编号写在 (0, 0) 像素的绿色通道，通道交换不影响它
const SCENE_CAR: u8 = 1;
const SCENE_EMPTY: u8 = 2;
const SCENE_CAR_TRUCK: u8 = 3;

/// 按帧内场景编号给出固定结果的检测器
struct ScriptedDetector {
  labels: LabelVocabulary,
  order: ChannelOrder,
}

impl ScriptedDetector {
  fn new() -> Self {
    Self {
      labels: LabelVocabulary::new(["car", "truck", "bus"]),
      order: ChannelOrder::Rgb,
    }
  }

  fn bgr() -> Self {
    Self {
      order: ChannelOrder::Bgr,
      ..Self::new()
    }
  }
}

impl Detector for ScriptedDetector {
  fn labels(&self) -> &LabelVocabulary {
    &self.labels
  }

  fn channel_order(&self) -> ChannelOrder {
    self.order
  }

  fn predict(&self, frame: &ColorFrame) -> Result<DetectResult, InferenceError> {
    if frame.order() != self.order {
      return Err(InferenceError::Runtime("通道顺序错误".to_string()));
    }
    let car = DetectItem {
      class_id: 0,
      score: 0.91,
      bbox: [4.0, 4.0, 14.0, 14.0],
    };
    let truck = DetectItem {
      class_id: 1,
      score: 0.66,
      bbox: [16.0, 4.0, 28.0, 20.0],
    };
    let items = match frame.pixels().get_pixel(0, 0)[1] {
      SCENE_CAR => vec![car],
      SCENE_CAR_TRUCK => vec![car, truck],
      _ => Vec::new(),
    };
    Ok(DetectResult::from(items))
  }
}

/// 场景编号 + 序号标记（右下角像素的红色通道）
fn scene_frame(scene: u8, index: u8) -> ColorFrame {
  let mut image = RgbImage::from_pixel(WIDTH, HEIGHT, Rgb([40, 40, 40]));
  image.put_pixel(0, 0, Rgb([0, scene, 0]));
  image.put_pixel(WIDTH - 1, HEIGHT - 1, Rgb([index, 0, 0]));
  ColorFrame::from(image)
}

struct MemorySource {
  frames: std::vec::IntoIter<Result<ColorFrame, DecodeError>>,
}

impl MemorySource {
  fn new(frames: Vec<ColorFrame>) -> Self {
    Self::with_results(frames.into_iter().map(Ok).collect())
  }

  fn with_results(frames: Vec<Result<ColorFrame, DecodeError>>) -> Self {
    Self {
      frames: frames.into_iter(),
    }
  }
}

impl Iterator for MemorySource {
  type Item = Result<ColorFrame, DecodeError>;

  fn next(&mut self) -> Option<Self::Item> {
    self.frames.next()
  }
}

impl FrameSource for MemorySource {
  fn geometry(&self) -> StreamGeometry {
    StreamGeometry {
      width: WIDTH,
      height: HEIGHT,
      fps: Some(25.0),
      frame_count: None,
    }
  }
}

#[derive(Default)]
struct MemorySink {
  frames: Vec<ColorFrame>,
  finished: bool,
  released: Arc<AtomicBool>,
}

impl MemorySink {
  fn tracked(released: Arc<AtomicBool>) -> Self {
    Self {
      frames: Vec::new(),
      finished: false,
      released,
    }
  }
}

impl FrameSink for MemorySink {
  fn write_frame(&mut self, frame: &ColorFrame) -> Result<(), EncodeError> {
    if self.finished {
      return Err(EncodeError::Finished);
    }
    self.frames.push(frame.clone());
    Ok(())
  }

  fn finish(&mut self) -> Result<(), EncodeError> {
    self.finished = true;
    Ok(())
  }
}

impl Drop for MemorySink {
  fn drop(&mut self) {
    self.released.store(true, Ordering::SeqCst);
  }
}

fn three_frames() -> Vec<ColorFrame> {
  vec![
    scene_frame(SCENE_CAR, 0),
    scene_frame(SCENE_EMPTY, 1),
    scene_frame(SCENE_CAR_TRUCK, 2),
  ]
}

#[test]
fn three_frame_video_accumulates_exposures() {
  let model = ScriptedDetector::new();
  let draw = Draw::without_font();
  let mut sink = MemorySink::default();

  let source = MemorySource::new(three_frames());
  let totals = detect_stream(&model, &draw, source, &mut sink, None).unwrap();

  let expected: CountTally = ["car", "car", "truck"].into_iter().collect();
  assert_eq!(totals.counts, expected);
  assert_eq!(totals.counts.summary(), "car: 2, truck: 1");
  assert_eq!(totals.frames, 3);
  assert!(sink.finished);

  // 写出顺序与读取顺序一致，尺寸不变
  assert_eq!(sink.frames.len(), 3);
  for (index, frame) in sink.frames.iter().enumerate() {
    assert_eq!(frame.dimensions(), (WIDTH, HEIGHT));
    assert_eq!(frame.pixels().get_pixel(WIDTH - 1, HEIGHT - 1)[0], index as u8);
  }

  // 没有检测的帧原样写出
  assert_eq!(sink.frames[1], scene_frame(SCENE_EMPTY, 1));
  assert_ne!(sink.frames[0], scene_frame(SCENE_CAR, 0));
}

#[test]
fn empty_stream_yields_empty_tally() {
  let model = ScriptedDetector::new();
  let mut sink = MemorySink::default();
  let source = MemorySource::new(Vec::new());
  let totals = detect_stream(&model, &Draw::without_font(), source, &mut sink, None).unwrap();

  assert!(totals.counts.is_empty());
  assert_eq!(totals.frames, 0);
  assert!(sink.frames.is_empty());
  assert!(sink.finished);
}

#[test]
fn repeated_runs_are_identical() {
  let model = ScriptedDetector::new();
  let draw = Draw::without_font();

  let mut first = MemorySink::default();
  let source = MemorySource::new(three_frames());
  let a = detect_stream(&model, &draw, source, &mut first, None).unwrap();
  let mut second = MemorySink::default();
  let source = MemorySource::new(three_frames());
  let b = detect_stream(&model, &draw, source, &mut second, None).unwrap();

  assert_eq!(a, b);
  assert_eq!(first.frames, second.frames);
}

#[test]
fn frames_are_converted_to_model_order() {
  let model = ScriptedDetector::bgr();
  let mut sink = MemorySink::default();
  let source = MemorySource::new(three_frames());
  let totals = detect_stream(&model, &Draw::without_font(), source, &mut sink, None).unwrap();

  assert_eq!(totals.counts.get("car"), 2);
  assert!(sink.frames.iter().all(|f| f.order() == ChannelOrder::Bgr));
  // 转回 RGB 后序号标记仍在红色通道
  let restored = sink.frames[2].clone().into_rgb_image();
  assert_eq!(restored.get_pixel(WIDTH - 1, HEIGHT - 1)[0], 2);
}

#[test]
fn cancellation_stops_and_releases_sink() {
  let model = ScriptedDetector::new();
  let cancel = Arc::new(AtomicBool::new(true));
  let released = Arc::new(AtomicBool::new(false));
  let sink = MemorySink::tracked(released.clone());

  let err = detect_stream(
    &model,
    &Draw::without_font(),
    MemorySource::new(three_frames()),
    sink,
    Some(cancel),
  )
  .unwrap_err();

  assert!(matches!(err, PipelineError::Cancelled));
  assert_eq!(err.kind(), ErrorKind::Cancelled);
  assert!(released.load(Ordering::SeqCst));
}

#[test]
fn unset_cancel_flag_runs_to_completion() {
  let model = ScriptedDetector::new();
  let mut sink = MemorySink::default();
  let cancel = Arc::new(AtomicBool::new(false));
  let totals = detect_stream(
    &model,
    &Draw::without_font(),
    MemorySource::new(three_frames()),
    &mut sink,
    Some(cancel),
  )
  .unwrap();
  assert_eq!(totals.frames, 3);
}

#[test]
fn decode_error_aborts_and_releases_sink() {
  let model = ScriptedDetector::new();
  let released = Arc::new(AtomicBool::new(false));
  let sink = MemorySink::tracked(released.clone());
  let source = MemorySource::with_results(vec![
    Ok(scene_frame(SCENE_CAR, 0)),
    Err(DecodeError::Truncated {
      expected: 2304,
      actual: 100,
    }),
    Ok(scene_frame(SCENE_CAR, 2)),
  ]);

  let err = detect_stream(&model, &Draw::without_font(), source, sink, None).unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Decode);
  assert!(released.load(Ordering::SeqCst));
}

#[test]
fn unknown_class_aborts_stream() {
  struct OutOfRange(LabelVocabulary);

  impl Detector for OutOfRange {
    fn labels(&self) -> &LabelVocabulary {
      &self.0
    }

    fn predict(&self, _frame: &ColorFrame) -> Result<DetectResult, InferenceError> {
      Ok(DetectResult::from(vec![DetectItem {
        class_id: 9,
        score: 0.5,
        bbox: [0.0, 0.0, 4.0, 4.0],
      }]))
    }
  }

  let model = OutOfRange(LabelVocabulary::new(["car"]));
  let mut sink = MemorySink::default();
  let source = MemorySource::new(three_frames());
  let err = detect_stream(&model, &Draw::without_font(), source, &mut sink, None).unwrap_err();
  assert!(matches!(err, PipelineError::UnknownClass { class_id: 9, len: 1 }));
  assert!(sink.frames.is_empty());
  assert!(!sink.finished);
}

fn png_bytes(frame: &ColorFrame) -> Vec<u8> {
  let mut bytes = Vec::new();
  frame
    .pixels()
    .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
    .unwrap();
  bytes
}

#[test]
fn uploaded_image_is_annotated_in_rgb() {
  let model = ScriptedDetector::bgr();
  let dir = tempfile::TempDir::new().unwrap();
  let payload = MediaPayload::new(png_bytes(&scene_frame(SCENE_CAR_TRUCK, 7)), "image/png")
    .with_file_name("road.png");

  let outcome = process_media(&model, &Draw::without_font(), &payload, dir.path(), None).unwrap();
  let MediaOutcome::Image {
    annotated,
    counts,
    detections,
  } = outcome
  else {
    panic!("expected an image outcome");
  };

  assert_eq!(annotated.dimensions(), (WIDTH, HEIGHT));
  assert_eq!(counts.summary(), "car: 1, truck: 1");
  assert_eq!(detections.len(), 2);
  // 显示用的图像是 RGB 顺序，绿色框仍为绿色
  assert_eq!(*annotated.get_pixel(4, 4), Rgb([0, 255, 0]));
  assert_eq!(annotated.get_pixel(WIDTH - 1, HEIGHT - 1)[0], 7);
}

#[test]
fn unsupported_upload_is_rejected() {
  let model = ScriptedDetector::new();
  let dir = tempfile::TempDir::new().unwrap();
  let payload = MediaPayload::new(b"%PDF-1.4".to_vec(), "application/pdf");
  let err = process_media(&model, &Draw::without_font(), &payload, dir.path(), None).unwrap_err();
  assert_eq!(err.kind(), ErrorKind::UnsupportedMedia);
}

#[test]
fn unreadable_video_upload_is_an_open_error_and_cleaned_up() {
  let _guard = tool_lock();
  let model = ScriptedDetector::new();
  let dir = tempfile::TempDir::new().unwrap();
  let payload =
    MediaPayload::new(b"this is not a video".to_vec(), "video/mp4").with_file_name("clip.mp4");

  let err = process_media(&model, &Draw::without_font(), &payload, dir.path(), None).unwrap_err();
  assert_eq!(err.kind(), ErrorKind::StreamOpen);
  assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn local_image_is_saved_next_to_input() {
  let model = ScriptedDetector::new();
  let dir = tempfile::TempDir::new().unwrap();
  let input = dir.path().join("road.png");
  std::fs::write(&input, png_bytes(&scene_frame(SCENE_CAR_TRUCK, 3))).unwrap();

  let report = process_file(&model, &Draw::default(), &input, None, None, None).unwrap();
  assert_eq!(report.kind, MediaKind::Image);
  assert_eq!(report.output, dir.path().join("road_annotated.png"));
  assert_eq!(report.frames, 1);
  assert_eq!(report.counts.summary(), "car: 1, truck: 1");

  let saved = image::open(&report.output).unwrap().to_rgb8();
  assert_eq!(saved.dimensions(), (WIDTH, HEIGHT));
  assert_eq!(*saved.get_pixel(4, 4), Rgb([0, 255, 0]));

  let json = serde_json::to_value(&report).unwrap();
  assert_eq!(json["kind"], "image");
  assert_eq!(json["frames"], 1);
}

#[test]
fn local_file_with_unknown_type_is_rejected() {
  let model = ScriptedDetector::new();
  let dir = tempfile::TempDir::new().unwrap();
  let input = dir.path().join("notes.txt");
  std::fs::write(&input, b"hello").unwrap();

  let err = process_file(&model, &Draw::without_font(), &input, None, None, None).unwrap_err();
  assert_eq!(err.kind(), ErrorKind::UnsupportedMedia);
  // 显式 MIME 优先于扩展名
  let err = process_file(&model, &Draw::without_font(), &input, Some("image/png"), None, None)
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Decode);
}

#[cfg(unix)]
#[test]
fn failed_video_leaves_no_partial_output() {
  use std::os::unix::fs::PermissionsExt;
  use yatra::{ffmpeg::FfmpegTools, task::detect_video_file_with};

  let _guard = tool_lock();
  let dir = tempfile::TempDir::new().unwrap();
  let scripts = [
    (
      "ffprobe",
      format!(
        "echo '{{\"streams\":[{{\"width\":{},\"height\":{},\"avg_frame_rate\":\"25/1\"}}]}}'\n",
        WIDTH, HEIGHT
      ),
    ),
    (
      "ffmpeg",
      // 编码时把标准输入写到最后一个参数；解码时给出一帧后报错
      format!(
        "case \"$1\" in\n  -y)\n    for last; do :; done\n    cat > \"$last\"\n    exit 0\n    ;;\n\
         esac\nhead -c {} /dev/zero\necho 'Invalid NAL unit size' >&2\nexit 1\n",
        WIDTH * HEIGHT * 3
      ),
    ),
  ];
  for (name, body) in &scripts {
    let path = dir.path().join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
  }
  let tools = FfmpegTools::in_dir(dir.path());
  let input = dir.path().join("clip.mp4");
  std::fs::write(&input, b"container").unwrap();
  let output = dir.path().join("clip_annotated.mp4");

  let model = ScriptedDetector::new();
  let err = detect_video_file_with(&model, &Draw::default(), &input, &output, None, &tools)
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Decode);
  assert!(err.to_string().contains("Invalid NAL unit size"), "{}", err);
  assert!(!output.exists());
}
