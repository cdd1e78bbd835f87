use std::sync::Arc;

use botlink_core::demo::MockRobot;
use botlink_core::protocol::framing::{data_length_command, instruction_bytes};
use botlink_core::protocol::{
    create_handler, decode_speed, encode_speed, resolve, ConnectionConfig, DeviceChannel,
    Instruction, ProtocolError, ProtocolVersion,
};
use pretty_assertions::assert_eq;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("botlink_core=debug")
        .try_init();
}

fn fast_config() -> ConnectionConfig {
    ConnectionConfig {
        response_timeout_ms: 200,
        record_margin_ms: 200,
        run_timeout_ms: 200,
        upload_timeout_ms: 200,
        download_packet_timeout_ms: 200,
        ..ConnectionConfig::default()
    }
}

fn open(firmware_version: u32) -> (Arc<MockRobot>, DeviceChannel<MockRobot>) {
    let robot = Arc::new(MockRobot::new(firmware_version));
    let channel = DeviceChannel::open(robot.clone());
    (robot, channel)
}

fn handler_for(firmware_version: u32) -> botlink_core::protocol::Handler {
    create_handler(resolve(firmware_version).unwrap())
}

#[test]
fn test_speed_encoding_round_trip() {
    for percent in 0..=100u8 {
        let decoded = decode_speed(encode_speed(percent));
        assert!(
            decoded.abs_diff(percent) <= 1,
            "{} came back as {}",
            percent,
            decoded
        );
    }
    assert_eq!(encode_speed(50), 128);
    assert_eq!(encode_speed(100), 255);
    assert_eq!(encode_speed(0), 0);
}

#[test]
fn test_version_resolution() {
    assert_eq!(resolve(2), Ok(ProtocolVersion::V3));
    assert_eq!(resolve(4), Ok(ProtocolVersion::V3));
    assert_eq!(resolve(9), Ok(ProtocolVersion::V6));
    assert_eq!(resolve(10), Ok(ProtocolVersion::V10));
    assert_eq!(resolve(42), Ok(ProtocolVersion::V10));
    for unsupported in [0, 1, 5, 6, 7, 8] {
        assert_eq!(
            resolve(unsupported),
            Err(ProtocolError::UnsupportedFirmwareVersion(unsupported))
        );
    }
}

#[test]
fn test_data_length_announcement() {
    assert_eq!(data_length_command(1).unwrap().text(), "d0001");
    assert_eq!(data_length_command(300).unwrap().text(), "d0257");
    assert!(data_length_command(0).is_err());
    assert!(data_length_command(40_000).is_err());
}

#[tokio::test]
async fn test_v3_upload_wire_sequence() {
    init_tracing();
    let (robot, channel) = open(3);
    let handler = handler_for(3);

    handler
        .upload_instructions(&channel, &fast_config(), &[Instruction::new(50, 50)], false)
        .await
        .unwrap();

    assert_eq!(
        robot.written_text(),
        vec!["F", "d0001", "E", "128,128xx", "end"]
    );
    assert_eq!(robot.program(), vec![Instruction::new(50, 50)]);
}

#[tokio::test]
async fn test_v3_upload_requires_full() {
    let (robot, channel) = open(3);
    robot.set_responding(false);

    let result = handler_for(3)
        .upload_instructions(&channel, &fast_config(), &[Instruction::new(50, 50)], false)
        .await;
    assert_eq!(result, Err(ProtocolError::Timeout));
}

#[tokio::test]
async fn test_v10_upload_is_chunked() {
    init_tracing();
    let (robot, channel) = open(10);
    let program: Vec<Instruction> = (0..300u32)
        .map(|i| Instruction::new((i % 101) as u8, (100 - i % 101) as u8))
        .collect();

    handler_for(10)
        .upload_instructions(&channel, &fast_config(), &program, false)
        .await
        .unwrap();

    let written = robot.written();
    assert_eq!(written.len(), 6);
    assert_eq!(written[0], b"F".to_vec());
    assert_eq!(written[1], b"d0257".to_vec());
    assert_eq!(written[2], b"E".to_vec());
    assert_eq!(written[3].len(), 512);
    assert_eq!(written[4].len(), 88);
    assert_eq!(written[5], b"end".to_vec());

    let mut blob = written[3].clone();
    blob.extend_from_slice(&written[4]);
    assert_eq!(blob, instruction_bytes(&program));
}

#[tokio::test]
async fn test_v6_upload_is_one_blob() {
    let (robot, channel) = open(9);
    let program = vec![Instruction::new(20, 80); 300];

    handler_for(9)
        .upload_instructions(&channel, &fast_config(), &program, false)
        .await
        .unwrap();

    let written = robot.written();
    assert_eq!(written.len(), 5);
    assert_eq!(written[3].len(), 600);
    assert_eq!(written[4], b"end".to_vec());
}

#[tokio::test]
async fn test_upload_then_run() {
    let (robot, channel) = open(10);

    handler_for(10)
        .upload_instructions(&channel, &fast_config(), &[Instruction::stopped()], true)
        .await
        .unwrap();

    assert_eq!(robot.written_text().last().map(String::as_str), Some("R"));
}

#[tokio::test]
async fn test_upload_limits() {
    let (robot, channel) = open(3);
    let handler = handler_for(3);

    let result = handler
        .upload_instructions(&channel, &fast_config(), &vec![Instruction::stopped(); 101], false)
        .await;
    assert_eq!(
        result,
        Err(ProtocolError::InvalidInstructionCount {
            count: 101,
            max: 100
        })
    );

    let result = handler
        .upload_instructions(&channel, &fast_config(), &[], false)
        .await;
    assert!(matches!(
        result,
        Err(ProtocolError::InvalidInstructionCount { count: 0, .. })
    ));
    assert!(robot.written().is_empty());
}

#[tokio::test]
async fn test_download_round_trip_every_protocol() {
    init_tracing();
    let program: Vec<Instruction> = (0..20u8)
        .map(|i| Instruction::new(i * 5, 100 - i * 3))
        .collect();

    for firmware_version in [3, 9, 10] {
        let (_robot, channel) = open(firmware_version);
        let handler = handler_for(firmware_version);
        let config = fast_config();

        handler
            .upload_instructions(&channel, &config, &program, false)
            .await
            .unwrap();
        let report = handler
            .download_instructions(&channel, &config)
            .await
            .unwrap();

        assert!(report.is_complete());
        assert_eq!(report.instructions.len(), program.len());
        for (sent, received) in program.iter().zip(&report.instructions) {
            assert!(
                sent.approx_eq(received),
                "firmware {}: {:?} came back as {:?}",
                firmware_version,
                sent,
                received
            );
        }
    }
}

#[tokio::test]
async fn test_binary_download_reports_lost_packet() {
    init_tracing();
    let program = vec![Instruction::new(50, 50); 20];
    let robot = Arc::new(
        MockRobot::new(10)
            .with_program(&program)
            .with_dropped_sequences(&[1]),
    );
    let channel = DeviceChannel::open(robot.clone());

    let report = handler_for(10)
        .download_instructions(&channel, &fast_config())
        .await
        .unwrap();

    assert_eq!(report.total_bytes, 40);
    assert_eq!(report.expected_packets, 3);
    assert_eq!(report.lost_packets, vec![1]);
    assert_eq!(report.missing_bytes, 14);
    assert!(!report.is_complete());
    // 14 bytes from payload 0 and 12 from payload 2
    assert_eq!(report.instructions.len(), 13);
    assert_eq!(robot.written_text(), vec!["B"]);
}

fn sample_program(len: usize) -> Vec<Instruction> {
    (0..len)
        .map(|i| Instruction::new((i % 101) as u8, (100 - (i * 7) % 101) as u8))
        .collect()
}

async fn assert_round_trip(firmware_version: u32, len: usize) {
    let (robot, channel) = open(firmware_version);
    let handler = handler_for(firmware_version);
    let config = fast_config();
    let program = sample_program(len);

    handler
        .upload_instructions(&channel, &config, &program, false)
        .await
        .unwrap();
    assert_eq!(robot.program().len(), len);
    let report = handler
        .download_instructions(&channel, &config)
        .await
        .unwrap();

    assert!(
        report.is_complete(),
        "firmware {}, {} instructions: {:?} lost, {} bytes missing",
        firmware_version,
        len,
        report.lost_packets,
        report.missing_bytes
    );
    assert_eq!(report.instructions.len(), len);
    assert!(program
        .iter()
        .zip(&report.instructions)
        .all(|(sent, received)| sent.approx_eq(received)));
}

#[tokio::test]
async fn test_round_trip_across_program_sizes() {
    init_tracing();
    for len in [1, 17, 99, 100] {
        assert_round_trip(3, len).await;
    }
    for len in [1, 8, 9, 17, 71, 72, 73, 300, 2400] {
        assert_round_trip(9, len).await;
    }
    for len in [1, 17, 300, 2399, 4095, 4096] {
        assert_round_trip(10, len).await;
    }
}

#[tokio::test]
async fn test_lost_packet_across_sequence_wrap() {
    let program = sample_program(4096);
    let robot = Arc::new(
        MockRobot::new(10)
            .with_program(&program)
            .with_dropped_sequences(&[255]),
    );
    let channel = DeviceChannel::open(robot);

    let report = handler_for(10)
        .download_instructions(&channel, &fast_config())
        .await
        .unwrap();

    assert_eq!(report.expected_packets, 456);
    assert_eq!(report.lost_packets, vec![255]);
    assert_eq!(report.missing_bytes, 18);
    assert_eq!(report.instructions.len(), 4096 - 9);
    // 9 pairs per payload: everything before and after payload 255 survives
    let kept = program[..255 * 9].iter().chain(&program[256 * 9..]);
    assert!(kept
        .zip(&report.instructions)
        .all(|(sent, received)| sent.approx_eq(received)));
}

#[tokio::test]
async fn test_binary_download_of_empty_memory() {
    let (_robot, channel) = open(9);

    let report = handler_for(9)
        .download_instructions(&channel, &fast_config())
        .await
        .unwrap();

    assert_eq!(report.total_bytes, 0);
    assert_eq!(report.expected_packets, 1);
    assert!(report.instructions.is_empty());
}

#[tokio::test]
async fn test_download_times_out_when_robot_is_silent() {
    let (robot, channel) = open(10);
    robot.set_responding(false);

    let result = handler_for(10)
        .download_instructions(&channel, &fast_config())
        .await;
    assert_eq!(result, Err(ProtocolError::Timeout));
}

#[tokio::test]
async fn test_record_wire_sequence() {
    let (robot, channel) = open(10);

    handler_for(10)
        .record_instructions(&channel, &fast_config(), 3, 4)
        .await
        .unwrap();

    // 4 samples per second for 3 seconds: 12 pairs, last byte index 23
    assert_eq!(robot.written_text(), vec!["F", "d0017", "L"]);
    assert_eq!(robot.program().len(), 12);
}

#[tokio::test]
async fn test_v3_record_ignores_interval() {
    let (robot, channel) = open(2);

    handler_for(2)
        .record_instructions(&channel, &fast_config(), 5, 8)
        .await
        .unwrap();

    assert_eq!(robot.written_text(), vec!["F", "d0009", "L"]);
}

#[tokio::test]
async fn test_record_rejects_zero_duration() {
    let (robot, channel) = open(9);

    let result = handler_for(9)
        .record_instructions(&channel, &fast_config(), 0, 1)
        .await;
    assert!(matches!(result, Err(ProtocolError::InvalidArgument(_))));
    assert!(robot.written().is_empty());
}

#[tokio::test]
async fn test_drive_mode_acks() {
    for firmware_version in [3, 9, 10] {
        let (robot, channel) = open(firmware_version);
        handler_for(firmware_version)
            .start_drive_mode(&channel, &fast_config())
            .await
            .unwrap();
        assert_eq!(robot.written_text(), vec!["G"]);
    }
}

#[tokio::test]
async fn test_drive_mode_rejects_other_generation_ack() {
    // A V3 robot answers `_GO_`, which the binary handlers do not accept
    let (_robot, channel) = open(3);
    let result = handler_for(10)
        .start_drive_mode(&channel, &fast_config())
        .await;
    assert_eq!(result, Err(ProtocolError::unexpected("_GR_", "_GO_")));
}

#[tokio::test]
async fn test_interval_get_and_set() {
    let (robot, channel) = open(9);
    let handler = handler_for(9);
    let config = fast_config();

    assert_eq!(handler.get_interval(&channel, &config).await, Ok(1));
    assert_eq!(handler.set_interval(&channel, &config, 5).await, Ok(5));
    assert_eq!(robot.interval(), 5);
    assert_eq!(handler.get_interval(&channel, &config).await, Ok(5));
    assert!(matches!(
        handler.set_interval(&channel, &config, 0).await,
        Err(ProtocolError::InvalidArgument(_))
    ));
    assert_eq!(robot.written_text(), vec!["I?", "I5", "I?"]);
}

#[tokio::test]
async fn test_stop_and_run() {
    let (robot, channel) = open(3);
    let handler = handler_for(3);
    let config = fast_config();

    handler.stop(&channel, &config).await.unwrap();
    handler.run_stored_instructions(&channel, &config).await.unwrap();
    assert_eq!(robot.written_text(), vec!["S", "R"]);
}

#[tokio::test]
async fn test_closed_link_rejects_writes() {
    let (robot, channel) = open(10);
    robot.drop_link();

    let result = handler_for(10)
        .stop(&channel, &fast_config())
        .await;
    assert_eq!(result, Err(ProtocolError::ConnectionClosed));
    assert!(channel.is_closed());
}
