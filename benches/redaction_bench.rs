//! Benchmarks for the redaction pipeline and the stream decoder.
//!
//! Run with: cargo bench --bench redaction_bench
//!
//! Redaction runs on every text fragment of every stream, so its cost per
//! fragment bounds the relay's per-token overhead.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use llm_relay::services::{FragmentMode, RedactionPipeline, ThinkingFilterMode};
use llm_relay::transformer::request::adapt_request;
use llm_relay::transformer::stream::{decode_upstream, FrameEncoder, StreamState, UpstreamEvent};
use llm_relay::transformer::Dialect;
use serde_json::json;

const CLEAN_SENTENCE: &str = "The borrow checker rejects this because the reference outlives the value. ";
const PERSONA_SENTENCE: &str = "Hi, I'm Droid, an AI software engineering agent built by Factory. ";

// ============================================================================
// Redaction Benchmarks
// ============================================================================

fn bench_filter_text_fragment(c: &mut Criterion) {
    let pipeline = RedactionPipeline::new(ThinkingFilterMode::KeywordBlock).unwrap();

    c.bench_function("filter_text_clean_fragment", |b| {
        b.iter(|| pipeline.filter_text(black_box("Hello, world"), FragmentMode::Stream))
    });
    c.bench_function("filter_text_persona_fragment", |b| {
        b.iter(|| pipeline.filter_text(black_box(PERSONA_SENTENCE), FragmentMode::Stream))
    });
}

fn bench_filter_text_document(c: &mut Criterion) {
    let pipeline = RedactionPipeline::new(ThinkingFilterMode::KeywordBlock).unwrap();
    let mut group = c.benchmark_group("filter_text_document");

    for sentences in [10usize, 100, 1000].iter() {
        let mut text = CLEAN_SENTENCE.repeat(*sentences);
        text.push_str(PERSONA_SENTENCE);

        group.throughput(Throughput::Bytes(text.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(sentences), &text, |b, text| {
            b.iter(|| pipeline.filter_text(black_box(text), FragmentMode::Batch))
        });
    }

    group.finish();
}

fn bench_filter_thinking(c: &mut Criterion) {
    let thinking = "Let me reason about the lifetimes first. The system prompt says to be brief.";
    let mut group = c.benchmark_group("filter_thinking");

    for mode in [
        ThinkingFilterMode::KeywordBlock,
        ThinkingFilterMode::PatternRemove,
    ] {
        let pipeline = RedactionPipeline::new(mode).unwrap();
        group.bench_function(mode.as_str(), |b| {
            b.iter(|| pipeline.filter_thinking(black_box(thinking), FragmentMode::Batch))
        });
    }

    group.finish();
}

// ============================================================================
// Decoding and Adaptation Benchmarks
// ============================================================================

fn bench_decode_stream_events(c: &mut Criterion) {
    let messages_delta = json!({
        "type": "content_block_delta",
        "index": 0,
        "delta": {"type": "text_delta", "text": "Hello"}
    })
    .to_string();
    let chat_chunk = json!({
        "id": "chatcmpl-1",
        "object": "chat.completion.chunk",
        "choices": [{"index": 0, "delta": {"content": "Hello"}, "finish_reason": null}]
    })
    .to_string();

    c.bench_function("decode_messages_delta", |b| {
        b.iter(|| decode_upstream(Dialect::Messages, Some("content_block_delta"), black_box(&messages_delta)))
    });
    c.bench_function("decode_chat_chunk", |b| {
        b.iter(|| decode_upstream(Dialect::ChatCompletions, None, black_box(&chat_chunk)))
    });
}

fn bench_stream_state(c: &mut Criterion) {
    let pipeline = RedactionPipeline::new(ThinkingFilterMode::KeywordBlock).unwrap();
    let events: Vec<UpstreamEvent> = std::iter::once(UpstreamEvent::Begin { id: None })
        .chain((0..100).map(|i| UpstreamEvent::Text(format!("token{} ", i))))
        .chain(std::iter::once(UpstreamEvent::Done))
        .collect();

    let mut group = c.benchmark_group("stream_transcode");
    group.throughput(Throughput::Elements(events.len() as u64));
    for target in [Dialect::Messages, Dialect::ChatCompletions] {
        group.bench_function(target.as_str(), |b| {
            b.iter(|| {
                let mut state = StreamState::new(Dialect::ChatCompletions, target);
                let mut encoder = FrameEncoder::new(target, "bench-model");
                let frames = state.apply_all(black_box(events.clone()), &pipeline);
                frames.iter().filter_map(|f| encoder.encode(f)).count()
            })
        });
    }
    group.finish();
}

fn bench_adapt_request(c: &mut Criterion) {
    let request = json!({
        "model": "claude-sonnet",
        "max_tokens": 1024,
        "system": "You are a helpful assistant.",
        "messages": [
            {"role": "user", "content": "Hello, how are you?"},
            {"role": "assistant", "content": [{"type": "text", "text": "Fine."}]},
            {"role": "user", "content": [{"type": "text", "text": "Explain lifetimes."}]}
        ],
        "stream": true
    })
    .to_string();

    c.bench_function("adapt_messages_to_chat", |b| {
        b.iter(|| {
            adapt_request(
                black_box(request.as_bytes()),
                Dialect::Messages,
                Dialect::ChatCompletions,
                None,
            )
        })
    });
}

criterion_group!(
    redaction_benches,
    bench_filter_text_fragment,
    bench_filter_text_document,
    bench_filter_thinking,
);

criterion_group!(
    codec_benches,
    bench_decode_stream_events,
    bench_stream_state,
    bench_adapt_request,
);

criterion_main!(redaction_benches, codec_benches);
