//! CAN 总线监听示例
//!
//! 打开接口、注册监听器并打印收到的数据帧和错误事件，Ctrl+C 退出。
//!
//! # 使用说明
//!
//! ```bash
//! # 接收全部帧
//! cargo run -p cancomms --example can_listen -- --interface vcan0
//!
//! # 只接收 0x100..0x1FF（mask:pattern，十六进制）
//! cargo run -p cancomms --example can_listen -- --interface vcan0 --filter 700:100
//! ```

use anyhow::{Context, Result, anyhow};
use cancomms::frame::{controller_error_message, protocol_error_message};
use cancomms::prelude::*;
use clap::Parser;
use crossbeam_channel::bounded;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Parser, Debug)]
#[command(name = "can_listen", about = "Print CAN frames received on an interface")]
struct Args {
    /// CAN 接口名称
    #[arg(short, long, default_value = "can0")]
    interface: String,

    /// 接收过滤器，格式 `mask:pattern`（十六进制），可重复
    #[arg(short, long = "filter", value_parser = parse_filter)]
    filters: Vec<CanFilter>,

    /// 分发队列容量
    #[arg(long, default_value_t = 1024)]
    queue_capacity: usize,

    /// 启动后发送一帧测试帧（ID 0x123）
    #[arg(long)]
    send_probe: bool,
}

fn parse_filter(s: &str) -> Result<CanFilter> {
    let (mask, pattern) = s
        .split_once(':')
        .ok_or_else(|| anyhow!("expected mask:pattern, got '{s}'"))?;
    let mask = u32::from_str_radix(mask.trim_start_matches("0x"), 16)
        .with_context(|| format!("invalid mask '{mask}'"))?;
    let pattern = u32::from_str_radix(pattern.trim_start_matches("0x"), 16)
        .with_context(|| format!("invalid pattern '{pattern}'"))?;
    Ok(CanFilter::new(mask, pattern))
}

struct PrintMessages {
    count: AtomicU64,
}

impl CanMessageListener for PrintMessages {
    fn on_message(&self, message: &CanMessage) -> ListenerResult {
        let n = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        println!("[{n:>6}] {message}");
        Ok(())
    }
}

struct PrintNotifications;

impl CanNotificationListener for PrintNotifications {
    fn notify_native_read_error(&self, fault: &ReadFault) -> ListenerResult {
        eprintln!("❌ {fault}");
        Ok(())
    }

    fn notify_bus_off_error(&self) -> ListenerResult {
        eprintln!("⚠️  bus off");
        Ok(())
    }

    fn notify_controller_restarted(&self) -> ListenerResult {
        eprintln!("ℹ️  controller restarted");
        Ok(())
    }

    fn notify_controller_error(&self, code: u8) -> ListenerResult {
        eprintln!("⚠️  {}", controller_error_message(code));
        Ok(())
    }

    fn notify_protocol_error(&self, code: u8) -> ListenerResult {
        eprintln!("⚠️  {}", protocol_error_message(code));
        Ok(())
    }
}

fn main() -> Result<()> {
    cancomms::init_logger("can_listen=info,cancomms_driver=info")?;

    let args = Args::parse();

    println!("🎯 Listening on {}", args.interface);
    for filter in &args.filters {
        println!("   filter: {filter:?}");
    }

    let handler = HandlerBuilder::new()
        .device(&args.interface)
        .filters(args.filters.iter().copied())
        .pipeline_config(PipelineConfig {
            queue_capacity: args.queue_capacity,
            ..PipelineConfig::default()
        })
        .build()
        .with_context(|| format!("failed to open {}", args.interface))?;

    let printer = Arc::new(PrintMessages {
        count: AtomicU64::new(0),
    });
    handler.add_message_listener(printer.clone());
    handler.add_notification_listener(Arc::new(PrintNotifications));
    handler.start()?;

    if args.send_probe {
        handler.transmit(&CanMessage::new_standard(0x123, &[0xDE, 0xAD, 0xBE, 0xEF]))?;
        println!("📤 probe frame sent");
    }

    let (stop_tx, stop_rx) = bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })?;

    let _ = stop_rx.recv();
    println!("\n⏳ stopping...");

    if let Err(e) = handler.stop() {
        eprintln!("stop reported: {e}");
    }
    let metrics = handler.metrics();

    println!("✅ {} data frames received", printer.count.load(Ordering::Relaxed));
    println!(
        "   rx={} error_frames={} queue_full_waits={} listener_failures={}",
        metrics.rx_frames_total,
        metrics.error_frames,
        metrics.queue_full_waits,
        metrics.listener_failures
    );
    println!(
        "   error frame rate {:.2}%, tx error rate {:.2}%",
        metrics.error_frame_rate(),
        metrics.tx_error_rate()
    );
    Ok(())
}
