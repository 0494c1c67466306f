//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름을 중앙에서 정의합니다. 각 모듈은 이
//! 상수로 `metrics::counter!()` / `metrics::gauge!()` 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `trap2json_`
//! - 단계명: `snmptrapd_`, `parser_`, `correlate_`, `forwarder_`
//!
//! # 레이블
//!
//! - parser 카운터: `worker`
//! - forwarder 카운터/게이지: `index`, `type`, `id`

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 파서 워커 번호 레이블 키
pub const LABEL_WORKER: &str = "worker";

/// 포워더 순번 레이블 키 (1부터)
pub const LABEL_INDEX: &str = "index";

/// 포워더 종류 레이블 키 (file, kafka, ...)
pub const LABEL_TYPE: &str = "type";

/// 포워더 id 레이블 키 (설정의 `id`)
pub const LABEL_ID: &str = "id";

// ─── snmptrapd 입력 스트림 ─────────────────────────────────────────

/// 수신한 레코드 토큰 수 (counter)
pub const SNMPTRAPD_PROCESSED: &str = "trap2json_snmptrapd_processed";

/// 수신한 바이트 수 (counter)
pub const SNMPTRAPD_PROCESSED_BYTES: &str = "trap2json_snmptrapd_processed_bytes";

/// begin 마커가 없어 버린 토큰 수 (counter)
pub const SNMPTRAPD_DROPPED: &str = "trap2json_snmptrapd_dropped";

/// 파서 채널로 넘긴 레코드 수 (counter)
pub const SNMPTRAPD_SUCCEEDED: &str = "trap2json_snmptrapd_succeeded";

// ─── 파서 ──────────────────────────────────────────────────────────

/// 파서가 받은 레코드 수 (counter, label: worker)
pub const PARSER_PROCESSED: &str = "trap2json_parser_processed";

/// 파싱 실패로 버린 레코드 수 (counter, label: worker)
pub const PARSER_DROPPED: &str = "trap2json_parser_dropped";

/// 파싱에 성공한 레코드 수 (counter, label: worker)
pub const PARSER_SUCCEEDED: &str = "trap2json_parser_succeeded";

// ─── 상관 엔진 ─────────────────────────────────────────────────────

/// 상관 큐에 들어온 메시지 수 (counter)
pub const CORRELATE_PROCESSED: &str = "trap2json_correlate_processed";

/// 어떤 조건에도 매칭되지 않았거나 과부하로 우회한 메시지 수 (counter)
pub const CORRELATE_SKIPPED: &str = "trap2json_correlate_skipped";

/// 상관 처리에 실패한 메시지 수 (counter)
pub const CORRELATE_FAILED: &str = "trap2json_correlate_failed";

/// 백엔드 오류로 재시도한 횟수 (counter)
pub const CORRELATE_RETRIED: &str = "trap2json_correlate_retried";

/// raise/clear 처리에 성공한 메시지 수 (counter)
pub const CORRELATE_SUCCEEDED: &str = "trap2json_correlate_succeeded";

/// 상관 큐 현재 길이 (gauge)
pub const CORRELATE_QUEUE_FILLED: &str = "trap2json_correlate_queue_filled";

/// 상관 큐 용량 (gauge)
pub const CORRELATE_QUEUE_CAPACITY: &str = "trap2json_correlate_queue_capacity";

// ─── 포워더 ────────────────────────────────────────────────────────

/// 포워더에 전달된 메시지 수 (counter, labels: index/type/id)
pub const FORWARDER_PROCESSED: &str = "trap2json_forwarder_processed";

/// 드롭된 메시지 수 (counter, labels: index/type/id)
pub const FORWARDER_DROPPED: &str = "trap2json_forwarder_dropped";

/// 재시도 횟수 (counter, labels: index/type/id)
pub const FORWARDER_RETRIED: &str = "trap2json_forwarder_retried";

/// filter 표현식으로 걸러진 메시지 수 (counter, labels: index/type/id)
pub const FORWARDER_FILTERED: &str = "trap2json_forwarder_filtered";

/// 전송에 성공한 메시지 수 (counter, labels: index/type/id)
pub const FORWARDER_SUCCEEDED: &str = "trap2json_forwarder_succeeded";

/// 호스트 조회에 실패한 메시지 수 (counter, labels: index/type/id)
pub const FORWARDER_LOOKUP_FAILED: &str = "trap2json_forwarder_lookup_failed";

/// 포워더 큐 현재 길이 (gauge, labels: index/type/id)
pub const FORWARDER_QUEUE_FILLED: &str = "trap2json_forwarder_queue_filled";

/// 포워더 큐 용량 (gauge, labels: index/type/id)
pub const FORWARDER_QUEUE_CAPACITY: &str = "trap2json_forwarder_queue_capacity";

/// 모든 메트릭의 설명을 전역 recorder에 등록합니다.
///
/// recorder 설치 직후 한 번만 호출합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge};

    describe_counter!(SNMPTRAPD_PROCESSED, "record tokens read from snmptrapd");
    describe_counter!(SNMPTRAPD_PROCESSED_BYTES, "bytes read from snmptrapd");
    describe_counter!(SNMPTRAPD_DROPPED, "tokens dropped for missing begin marker");
    describe_counter!(SNMPTRAPD_SUCCEEDED, "records handed to the parser channel");

    describe_counter!(PARSER_PROCESSED, "records received by a parser worker");
    describe_counter!(PARSER_DROPPED, "records dropped on parse failure");
    describe_counter!(PARSER_SUCCEEDED, "records parsed into messages");

    describe_counter!(CORRELATE_PROCESSED, "messages entering the correlate queue");
    describe_counter!(CORRELATE_SKIPPED, "messages bypassing correlation");
    describe_counter!(CORRELATE_FAILED, "messages that failed correlation");
    describe_counter!(CORRELATE_RETRIED, "correlation retries on backend errors");
    describe_counter!(CORRELATE_SUCCEEDED, "messages correlated successfully");
    describe_gauge!(CORRELATE_QUEUE_FILLED, "correlate queue length");
    describe_gauge!(CORRELATE_QUEUE_CAPACITY, "correlate queue capacity");

    describe_counter!(FORWARDER_PROCESSED, "messages dispatched to a forwarder");
    describe_counter!(FORWARDER_DROPPED, "messages dropped by a forwarder");
    describe_counter!(FORWARDER_RETRIED, "delivery retries");
    describe_counter!(FORWARDER_FILTERED, "messages removed by the filter expression");
    describe_counter!(FORWARDER_SUCCEEDED, "messages delivered successfully");
    describe_counter!(FORWARDER_LOOKUP_FAILED, "failed host lookups");
    describe_gauge!(FORWARDER_QUEUE_FILLED, "forwarder queue length");
    describe_gauge!(FORWARDER_QUEUE_CAPACITY, "forwarder queue capacity");
}
