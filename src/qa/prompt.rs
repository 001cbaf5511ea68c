//! 답변 프롬프트와 고정 응답 문구

/// 검색된 청크가 없을 때의 답변
pub const NO_CONTEXT_ANSWER: &str =
    "I could not find any relevant information in the document for your query.";

/// 모델이 빈 텍스트를 돌려줬을 때의 답변
pub const EMPTY_RESPONSE_ANSWER: &str =
    "Received an unexpected response format from the Google Generative AI model.";

/// 생성 실패 시 답변 접두어 (뒤에 에러 메시지)
pub const GENERATION_ERROR_PREFIX: &str =
    "An error occurred while trying to get an answer from the model: ";

const PROMPT_INSTRUCTIONS: &str = "Use the following pieces of context to answer the question at the end. \
Answer the question by taking the given context as the only, one and only source of information.
Observe the whole context keenly and answer the questions. \
Let the answer be in a one or two medium to long sentences.
Read the whole context for a few times before answering the question.
If you don't know the answer, just say that you don't know, don't try to make up an answer.";

/// 문맥과 질문으로 프롬프트 생성
pub fn build_prompt(context: &str, question: &str) -> String {
    format!(
        "{}\n\nContext:\n{}\n\nQuestion: {}\n\nAnswer:",
        PROMPT_INSTRUCTIONS, context, question
    )
}

/// 생성 에러를 답변 문자열로
pub fn generation_error_answer(error: &anyhow::Error) -> String {
    format!("{}{:#}", GENERATION_ERROR_PREFIX, error)
}
