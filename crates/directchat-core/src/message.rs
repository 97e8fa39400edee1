//! 消息日志
//!
//! 会话内只追加的有序消息记录。序号在文本被接受发送或从线路上收到时分配，
//! 之后不再重排。

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Sent,
    Received,
}

/// 投递状态（只对发送的消息有意义，收到的消息总是 `Delivered`）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryState {
    Pending,
    Delivered,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub text: String,
    pub direction: Direction,
    pub sequence: u64,
    pub delivery_state: DeliveryState,
}

#[derive(Debug, Clone)]
pub struct MessageLog {
    messages: Vec<Message>,
    next_sequence: u64,
}

impl Default for MessageLog {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            next_sequence: 1,
        }
    }
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一条待发送消息，返回分配的序号
    pub fn record_sent(&mut self, text: String) -> u64 {
        self.append(text, Direction::Sent, DeliveryState::Pending)
    }

    /// 记录一条收到的消息，返回分配的序号
    pub fn record_received(&mut self, text: String) -> u64 {
        self.append(text, Direction::Received, DeliveryState::Delivered)
    }

    /// 更新发送消息的投递状态
    ///
    /// 只有 `Pending` 的消息可以转为终态，返回是否发生了变化。
    pub fn set_delivery(&mut self, sequence: u64, state: DeliveryState) -> bool {
        match self
            .messages
            .iter_mut()
            .find(|m| m.sequence == sequence && m.direction == Direction::Sent)
        {
            Some(message) if message.delivery_state == DeliveryState::Pending => {
                message.delivery_state = state;
                true
            }
            _ => false,
        }
    }

    /// 将所有仍在等待的消息标记为失败，返回受影响的序号
    pub fn fail_pending(&mut self) -> Vec<u64> {
        self.messages
            .iter_mut()
            .filter(|m| m.delivery_state == DeliveryState::Pending)
            .map(|m| {
                m.delivery_state = DeliveryState::Failed;
                m.sequence
            })
            .collect()
    }

    /// 新链路建立时清空
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn append(&mut self, text: String, direction: Direction, delivery_state: DeliveryState) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.messages.push(Message {
            text,
            direction,
            sequence,
            delivery_state,
        });
        sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequences_increase_across_directions() {
        let mut log = MessageLog::new();
        assert_eq!(log.record_sent("hi".into()), 1);
        assert_eq!(log.record_received("hello".into()), 2);
        assert_eq!(log.record_sent("bye".into()), 3);

        let order: Vec<u64> = log.snapshot().iter().map(|m| m.sequence).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn test_delivery_transitions_once() {
        let mut log = MessageLog::new();
        let seq = log.record_sent("hi".into());

        assert!(log.set_delivery(seq, DeliveryState::Delivered));
        assert!(!log.set_delivery(seq, DeliveryState::Failed));
        assert_eq!(log.snapshot()[0].delivery_state, DeliveryState::Delivered);
    }

    #[test]
    fn test_received_messages_are_not_updated() {
        let mut log = MessageLog::new();
        let seq = log.record_received("hello".into());

        assert!(!log.set_delivery(seq, DeliveryState::Failed));
        assert_eq!(log.snapshot()[0].delivery_state, DeliveryState::Delivered);
    }

    #[test]
    fn test_fail_pending() {
        let mut log = MessageLog::new();
        let a = log.record_sent("a".into());
        let b = log.record_sent("b".into());
        log.set_delivery(a, DeliveryState::Delivered);

        assert_eq!(log.fail_pending(), vec![b]);
        assert!(log.fail_pending().is_empty());
    }

    #[test]
    fn test_reset_restarts_sequence() {
        let mut log = MessageLog::new();
        log.record_sent("a".into());
        log.reset();

        assert!(log.is_empty());
        assert_eq!(log.record_sent("b".into()), 1);
    }
}
