// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 宠物/犬种识别命令行工具
///
/// cargo run --bin dogbreed -- predict -m best.onnx -s dog.jpg
/// cargo run --bin dogbreed -- track -m best.onnx --frames frames/ --out runs/track
use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use dogbreed_rs::media::ImageSequence;
use dogbreed_rs::player::{Outcome, VideoPlayer};
use dogbreed_rs::records::{PredictionRecord, PredictionSink, SqliteSink};
use dogbreed_rs::{DetectorSession, LabelMap, SessionConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "宠物/犬种识别 (YOLOv8 ONNX)", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 单图预测
    Predict(PredictArgs),
    /// 视频逐帧跟踪
    Track(TrackArgs),
    /// 查看类别显示名
    Labels(LabelsArgs),
    /// 查看预测记录
    History(HistoryArgs),
}

/// 模型与会话参数
#[derive(Args, Debug)]
struct ModelArgs {
    /// ONNX 模型文件
    #[arg(short, long)]
    model: PathBuf,

    /// 会话配置文件 (JSON, 不存在时写入默认值)
    #[arg(long)]
    config: Option<PathBuf>,

    /// 置信度下限 (覆盖配置文件)
    #[arg(long)]
    conf: Option<f32>,

    /// 使用 CUDA
    #[arg(long)]
    cuda: bool,

    /// 类别显示名 JSON
    #[arg(long)]
    labels: Option<PathBuf>,
}

impl ModelArgs {
    fn session_config(&self) -> SessionConfig {
        let mut config = match &self.config {
            Some(path) => SessionConfig::load(path),
            None => SessionConfig::default(),
        };
        if let Some(conf) = self.conf {
            config.conf = conf;
        }
        if self.cuda {
            config.cuda = true;
        }
        if self.labels.is_some() {
            config.label_file = self.labels.clone();
        }
        config
    }
}

#[derive(Args, Debug)]
struct PredictArgs {
    #[command(flatten)]
    model: ModelArgs,

    /// 输入图片 (可多张)
    #[arg(short, long, required = true, num_args = 1..)]
    source: Vec<PathBuf>,

    /// 标注结果保存目录
    #[arg(long, default_value = "runs/detect")]
    save_dir: PathBuf,

    /// 用户ID (写入预测记录)
    #[arg(long, default_value_t = 0)]
    actor: i64,

    /// 预测记录库 (默认: 数据目录/dogbreed/predictions.db)
    #[arg(long)]
    db: Option<PathBuf>,

    /// 不写入预测记录
    #[arg(long)]
    no_record: bool,
}

#[derive(Args, Debug)]
struct TrackArgs {
    #[command(flatten)]
    model: ModelArgs,

    /// 帧图片目录
    #[arg(long, conflicts_with = "video")]
    frames: Option<PathBuf>,

    /// 视频文件 (需要 ffmpeg 特性)
    #[arg(long)]
    video: Option<PathBuf>,

    /// 帧率
    #[arg(long, default_value_t = 25.0)]
    fps: f32,

    /// 标注帧输出目录
    #[arg(long, default_value = "runs/track")]
    out: PathBuf,
}

#[derive(Args, Debug)]
struct LabelsArgs {
    /// 要翻译的类别名, 为空时只显示表大小
    names: Vec<String>,

    /// 类别显示名 JSON
    #[arg(long)]
    labels: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct HistoryArgs {
    /// 只显示某个用户
    #[arg(long)]
    actor: Option<i64>,

    /// 最多显示条数
    #[arg(long, default_value_t = 20)]
    limit: usize,

    /// 预测记录库
    #[arg(long)]
    db: Option<PathBuf>,
}

fn default_db() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("dogbreed").join("predictions.db"))
        .unwrap_or_else(|| PathBuf::from("predictions.db"))
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Cli::parse().command {
        Command::Predict(args) => predict(args),
        Command::Track(args) => track(args),
        Command::Labels(args) => labels(args),
        Command::History(args) => history(args),
    }
}

fn predict(args: PredictArgs) -> anyhow::Result<()> {
    let mut config = args.model.session_config();
    config.save_dir = Some(args.save_dir.clone());
    config.print_summary();

    let mut session = DetectorSession::load(&args.model.model, config)
        .with_context(|| format!("加载模型失败: {}", args.model.model.display()))?;

    let mut sink = if args.no_record {
        None
    } else {
        let db = args.db.clone().unwrap_or_else(default_db);
        Some(SqliteSink::open(&db).with_context(|| format!("打开记录库失败: {}", db.display()))?)
    };

    for source in &args.source {
        let outcome = Outcome::from_result(session.predict_image(source));
        println!("{} → {}", source.display(), outcome);
        if let (Some(sink), Some(det)) = (sink.as_mut(), outcome.detection()) {
            sink.record(&PredictionRecord::new(args.actor, source, det))?;
        }
    }

    if let Some(dir) = session.last_save_dir() {
        println!("💾 标注结果保存在 {}", dir.display());
    }
    Ok(())
}

fn open_frames(args: &TrackArgs) -> anyhow::Result<ImageSequence> {
    if let Some(dir) = &args.frames {
        return Ok(ImageSequence::open(dir, args.fps)?);
    }
    match &args.video {
        #[cfg(feature = "ffmpeg")]
        Some(video) => {
            let work_dir = args.out.join("frames");
            Ok(dogbreed_rs::media::open_video(video, work_dir, args.fps)?)
        }
        #[cfg(not(feature = "ffmpeg"))]
        Some(_) => anyhow::bail!("读取视频文件需要启用 ffmpeg 特性, 或用 --frames 传入帧目录"),
        None => anyhow::bail!("需要 --frames 或 --video"),
    }
}

fn track(args: TrackArgs) -> anyhow::Result<()> {
    let config = args.model.session_config();
    config.print_summary();
    let session = DetectorSession::load(&args.model.model, config)
        .with_context(|| format!("加载模型失败: {}", args.model.model.display()))?;

    let frames = open_frames(&args)?;
    let mut player = VideoPlayer::open(frames, session, args.out.join("snapshots"));
    player.set_tracking(true);
    player.play();

    let annotated_dir = args.out.join("annotated");
    std::fs::create_dir_all(&annotated_dir)?;

    while player.is_playing() {
        match player.step() {
            Ok(Some(output)) => {
                let ids: Vec<String> = output
                    .detections
                    .iter()
                    .filter_map(|d| d.track_id.map(|id| format!("#{} {}", id, d.label)))
                    .collect();
                println!("帧 {:>6}: {}", output.index, ids.join(", "));
                let path = annotated_dir.join(format!("{:06}.png", output.index));
                std::fs::write(&path, output.to_png()?)?;
            }
            Ok(None) => break,
            // 单帧失败不中断跟踪
            Err(e) => log::warn!("⚠️ {:#}", e),
        }
    }

    player.close();
    println!("💾 标注帧保存在 {}", annotated_dir.display());
    Ok(())
}

fn labels(args: LabelsArgs) -> anyhow::Result<()> {
    let map = match &args.labels {
        Some(path) => LabelMap::from_json_file(path)?,
        None => LabelMap::builtin(),
    };
    if args.names.is_empty() {
        println!("显示名表: {} 条", map.len());
    }
    for name in &args.names {
        println!("{} → {}", name, map.translate(name));
    }
    Ok(())
}

fn history(args: HistoryArgs) -> anyhow::Result<()> {
    let db = args.db.clone().unwrap_or_else(default_db);
    let sink = SqliteSink::open(&db).with_context(|| format!("打开记录库失败: {}", db.display()))?;
    let records = match args.actor {
        Some(actor) => sink.by_actor(actor)?,
        None => sink.recent(args.limit)?,
    };
    if records.is_empty() {
        println!("暂无预测记录");
    }
    for r in records.iter().take(args.limit) {
        println!(
            "{} | 用户 {} | {} | {} ({:.2})",
            r.timestamp
                .with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S"),
            r.actor_id,
            r.source_path,
            r.result_label,
            r.confidence
        );
    }
    Ok(())
}
